use log::{debug, warn};

use crate::hex;
use crate::status::CME_SDS_MAYBE_SENT;

/// Prefix of the unsolicited line announcing an incoming SDS.
pub const SDS_HEADER: &str = "+CTSDSR";
/// Prefix of the cell-list count line.
pub const CELL_LIST: &str = "+GCLI:";

/// Header fields of an incoming SDS.
///
/// Header wire format: `+CTSDSR: <service>,<sender>,<type>,<destination>,...`
///
/// The fields are positional; any of them may be missing on a garbled line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdsHeader {
    /// ISSI of the sending terminal.
    pub sender: Option<String>,
    /// Message discriminator (`2` marks a status message).
    pub discriminator: Option<String>,
    /// ISSI or group the message was addressed to.
    pub destination: Option<String>,
}

impl SdsHeader {
    /// Parse the header fields from a (possibly continued) header line.
    pub fn parse(line: &str) -> Self {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |i: usize| {
            parts
                .get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        Self {
            sender: field(1),
            discriminator: field(2),
            destination: field(3),
        }
    }
}

/// A complete SDS: header plus hex payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdsRecord {
    pub header: SdsHeader,
    /// The raw header line(s) as received.
    pub raw_header: String,
    /// Payload as a trimmed hex string.
    pub payload: String,
}

/// A logical record assembled from one or more terminal lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// An incoming SDS with its payload.
    Sds(SdsRecord),
    /// One entry of a cell list announced by `+GCLI:`.
    CellEntry(String),
    /// Any other line, passed through unchanged.
    Line(String),
}

/// Reassembles multi-line terminal output into logical records.
///
/// One reassembler is kept per device. Lines must be fed in arrival order.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending_header: Option<String>,
    pending_cells: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without terminator).
    ///
    /// Returns a record once one is complete, or `None` while buffering.
    pub fn feed(&mut self, line: &str) -> Option<Record> {
        if let Some(header) = self.pending_header.as_mut() {
            if line.trim_start().starts_with(',') {
                header.push_str(line);
                return None;
            }
            let trimmed = line.trim();
            if hex::is_hex(trimmed) {
                let raw_header = self.pending_header.take().unwrap_or_default();
                return Some(Record::Sds(SdsRecord {
                    header: SdsHeader::parse(&raw_header),
                    raw_header,
                    payload: trimmed.to_string(),
                }));
            }
        }

        if line.starts_with(SDS_HEADER) {
            if let Some(stale) = self.pending_header.replace(line.to_string()) {
                warn!("dropping SDS header without payload: {stale}");
            }
            return None;
        }

        if let Some(rest) = line.strip_prefix(CELL_LIST) {
            if let Ok(count) = rest.trim().parse::<usize>() {
                debug!("expecting {count} cell entries");
                self.pending_cells = count;
                return None;
            }
        } else if self.pending_cells > 0 {
            self.pending_cells -= 1;
            return Some(Record::CellEntry(line.to_string()));
        }

        if is_error_line(line) && self.pending_header.take().is_some() {
            warn!("SDS header abandoned after terminal error: {line}");
        }

        Some(Record::Line(line.to_string()))
    }

    /// Discard any partially assembled record.
    pub fn reset(&mut self) {
        self.pending_header = None;
        self.pending_cells = 0;
    }

    /// Returns `true` while an SDS header is waiting for its payload.
    pub fn has_pending_header(&self) -> bool {
        self.pending_header.is_some()
    }

    /// Number of cell-list lines still expected.
    pub fn pending_cells(&self) -> usize {
        self.pending_cells
    }
}

/// `ERROR` or `+CME ERROR`, except the advisory about our own outbound SDS.
fn is_error_line(line: &str) -> bool {
    let line = line.trim();
    if line == "ERROR" {
        return true;
    }
    match line.strip_prefix("+CME ERROR:") {
        Some(code) => code.trim().parse::<u16>().ok() != Some(CME_SDS_MAYBE_SENT),
        None => false,
    }
}
