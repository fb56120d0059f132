//! Parsers for single-line terminal reports (signal strength, cell list,
//! the terminal's own GPS position, delivery and error notices).

/// Convert an RSSI index (0–31) to dBm.
pub fn rssi_to_dbm(rssi: u8) -> i32 {
    -113 + 2 * i32::from(rssi)
}

/// Highest valid RSSI index.
const RSSI_MAX: u8 = 31;

/// A decoded terminal status line.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalReport {
    /// `+CSQ:` signal quality.
    SignalQuality { rssi: u8, dbm: i32 },
    /// `+CREG:` registration report carrying a signal level. `rssi` is `None`
    /// when the terminal reported dBm directly.
    Registration { rssi: Option<u8>, dbm: i32 },
    /// `+GPSPOS:` the terminal's own position.
    OwnPosition { latitude: f64, longitude: f64 },
    /// `+CMGS:` the network accepted an outgoing SDS.
    DeliveryConfirmed { reference: String },
    /// `+CME ERROR: <code>`.
    CommandError { code: u16 },
    /// `+CNUMF:` the terminal's own number.
    OwnNumber { issi: String },
}

/// One entry of a `+GCLI` cell list.
#[derive(Debug, Clone, PartialEq)]
pub struct CellEntry {
    pub cell: String,
    pub frequency: String,
    /// `None` when the RSSI column is not numeric.
    pub rssi: Option<u8>,
}

impl CellEntry {
    pub fn dbm(&self) -> Option<i32> {
        self.rssi.map(rssi_to_dbm)
    }
}

/// CME error code the terminal returns even when an SDS went out.
pub const CME_SDS_MAYBE_SENT: u16 = 35;

/// Parse a standalone terminal line. Returns `None` for lines without a known
/// report or with an unreadable value.
pub fn parse_line(line: &str) -> Option<TerminalReport> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("+CSQ:") {
        return parse_csq(rest);
    }
    if line.starts_with("+CREG:") {
        return parse_creg(line);
    }
    if let Some(pos) = line.find("+GPSPOS:") {
        return parse_gpspos(&line[pos + "+GPSPOS:".len()..]);
    }
    if let Some(pos) = line.find("+CMGS:") {
        return Some(TerminalReport::DeliveryConfirmed {
            reference: line[pos + "+CMGS:".len()..].trim().to_string(),
        });
    }
    if let Some(pos) = line.find("+CME ERROR:") {
        let code = line[pos + "+CME ERROR:".len()..].trim().parse().ok()?;
        return Some(TerminalReport::CommandError { code });
    }
    if let Some(rest) = line.strip_prefix("+CNUMF:") {
        return parse_cnumf(rest);
    }
    None
}

fn parse_csq(rest: &str) -> Option<TerminalReport> {
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let rssi: u8 = digits.parse().ok()?;
    Some(TerminalReport::SignalQuality {
        rssi,
        dbm: rssi_to_dbm(rssi),
    })
}

fn parse_creg(line: &str) -> Option<TerminalReport> {
    if let Some(dbm) = explicit_dbm(line) {
        return Some(TerminalReport::Registration { rssi: None, dbm });
    }
    let rssi: u8 = line.rsplit(',').next()?.trim().parse().ok()?;
    if rssi > RSSI_MAX {
        return None;
    }
    Some(TerminalReport::Registration {
        rssi: Some(rssi),
        dbm: rssi_to_dbm(rssi),
    })
}

/// Find an integer directly followed by `dBm` (any case, optional spaces).
fn explicit_dbm(line: &str) -> Option<i32> {
    let lower = line.to_ascii_lowercase();
    let unit = lower.find("dbm")?;
    let number = lower[..unit].trim_end();
    let start = number
        .rfind(|c: char| !(c.is_ascii_digit() || c == '-'))
        .map_or(0, |i| i + 1);
    number[start..].parse().ok()
}

/// Parse `hh:mm:ss,N: dd_mm.mmmm,E: ddd_mm.mmmm`.
fn parse_gpspos(rest: &str) -> Option<TerminalReport> {
    let mut fields = rest.split(',').map(str::trim);
    let _time = fields.next()?;
    let latitude = parse_hemisphere(fields.next()?, 'N', 'S')?;
    let longitude = parse_hemisphere(fields.next()?, 'E', 'W')?;
    Some(TerminalReport::OwnPosition {
        latitude,
        longitude,
    })
}

/// Parse `N: dd_mm.mmmm` into signed decimal degrees.
fn parse_hemisphere(field: &str, positive: char, negative: char) -> Option<f64> {
    let (hemisphere, value) = field.split_once(':')?;
    let sign = match hemisphere.trim().chars().next()? {
        c if c == positive => 1.0,
        c if c == negative => -1.0,
        _ => return None,
    };
    let (degrees, minutes) = value.trim().split_once('_')?;
    let degrees: f64 = degrees.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    Some(sign * (degrees + minutes / 60.0))
}

/// Parse `+CNUMF: <type>,<number>`. The ISSI is the last seven digits.
fn parse_cnumf(rest: &str) -> Option<TerminalReport> {
    let number = rest.split(',').nth(1)?.trim().trim_matches('"');
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let issi = &number[number.len().saturating_sub(7)..];
    Some(TerminalReport::OwnNumber {
        issi: issi.to_string(),
    })
}

/// Parse one `+GCLI` cell-list entry: `cell,frequency,rssi,...`.
pub fn parse_cell_entry(line: &str) -> Option<CellEntry> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    Some(CellEntry {
        cell: parts[0].to_string(),
        frequency: parts[1].to_string(),
        rssi: parts[2].parse().ok(),
    })
}
