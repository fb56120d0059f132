use std::fmt;
use std::time::Duration;

use crate::hex;

/// Position request payloads.
pub mod request {
    /// Immediate LIP location request.
    pub const LIP: &str = "0A4591C128293D";
    /// LIP location request asking for the long report.
    pub const LONG_LIP: &str = "0A4591C128293D00";
    /// Location request in the route-reporting protocol.
    pub const LRRP: &str = "0B01A1000000";
}

/// Acknowledgement payloads.
pub mod ack {
    /// "ACK" as text.
    pub const TEXT: &str = "41434B";
    pub const STATUS: &str = "0001";
}

/// Ctrl-Z, terminates an SDS payload after `AT+CMGS`.
pub const SUB: char = '\u{1A}';
/// Line terminator appended to every write.
pub const LINE_END: &str = "\r\n";

/// Number of TNP1 service profiles on the terminal.
pub const TNP1_PROFILES: u8 = 16;

/// Commands sent once after a terminal connects.
pub const DEFAULT_INIT_COMMANDS: &[&str] = &[
    "ATE0",
    "AT+CSCS=\"8859-1\"",
    "AT+CTSP=1,1,11",
    "AT+CTSP=2,0,0",
    "AT+CREG=2",
    "AT+IFC=0,0",
    "AT+CTSP=1,3,2",
    "ATI",
    "AT+GMI",
    "AT+CTGS?",
    "AT+CTSP=2,2,20",
    "AT+CTSP=1,3,130",
    "AT+CTSP=1,3,137",
    "AT+CTSP=1,3,138",
    "AT+CTSP=1,3,140",
    "AT+GMI?",
    "AT+CNUMF?",
    "AT+GMM",
    "ATI1",
    "AT+CTSP=1,3,3",
    "AT+CTSP=1,3,131",
    "AT+CTSP=1,3,10",
    "AT+CTSP=1,3,224",
    "AT+CTSP=1,3,195",
    "AT+CTSP=1,3,204",
    "AT+CTSP=1,3,210",
    "AT+CTSP=1,3,220",
    "AT+CTSP=1,3,242",
    "ATI7",
    "AT+CTGL=0,0,1",
    "AT+MCDNTN=ComPort-Verbunden,TETRA-Terminal,10,4",
];

/// Pauses the terminal needs between steps.
mod delay {
    use std::time::Duration;

    pub const AFTER_SETUP: Duration = Duration::from_millis(200);
    pub const AFTER_SDS_MODE: Duration = Duration::from_millis(300);
    /// The terminal prompts for the payload only after a while.
    pub const AFTER_CMGS: Duration = Duration::from_millis(4000);
    pub const AFTER_PROFILE: Duration = Duration::from_millis(100);
}

/// Which position request to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    Lip,
    LongLip,
    Lrrp,
}

impl PositionKind {
    pub fn payload(self) -> &'static str {
        match self {
            PositionKind::Lip => request::LIP,
            PositionKind::LongLip => request::LONG_LIP,
            PositionKind::Lrrp => request::LRRP,
        }
    }
}

/// How a device acknowledges incoming SDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Send nothing.
    #[default]
    None,
    /// Reply with the text "ACK".
    Text,
    /// Reply with status `0001`.
    Status,
}

/// An AT command to send to a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask a terminal for its position.
    RequestPosition { dest: String, kind: PositionKind },
    /// Send a text SDS.
    SendText {
        dest: String,
        text: String,
        sds_type: u8,
    },
    /// Send a raw hex SDS payload.
    SendHex {
        dest: String,
        hex: String,
        sds_type: u8,
    },
    /// Acknowledge an SDS from `dest`.
    Ack { dest: String, mode: AckMode },
    /// Switch to a talk-group.
    SelectTalkGroup(String),
    /// Run an initialisation sequence. Empty uses [`DEFAULT_INIT_COMMANDS`].
    Init(Vec<String>),
    /// Enable all TNP1 service profiles.
    EnableTnp1Profiles,
    /// A line passed through unchanged.
    Raw(String),
}

/// One write to the terminal followed by a pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Line without terminator.
    pub line: String,
    pub delay_after: Duration,
}

impl Step {
    fn new(line: impl Into<String>, delay_after: Duration) -> Self {
        Self {
            line: line.into(),
            delay_after,
        }
    }

    fn immediate(line: impl Into<String>) -> Self {
        Self::new(line, Duration::ZERO)
    }

    /// Bytes to write, terminated and encoded as Latin-1.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.line
            .chars()
            .chain(LINE_END.chars())
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect()
    }
}

impl Command {
    /// Expand the command into the writes the terminal expects, in order.
    ///
    /// Returns an empty list for commands that send nothing, such as an
    /// acknowledgement with [`AckMode::None`].
    pub fn steps(&self) -> Vec<Step> {
        match self {
            Command::RequestPosition { dest, kind } => sds_steps(dest, kind.payload(), 0),
            Command::SendHex { dest, hex, sds_type } => sds_steps(dest, hex, *sds_type),
            Command::SendText {
                dest,
                text,
                sds_type,
            } => {
                let pdu = format!("{}{}", crate::classify::TEXT_PREFIX, hex::text_to_hex(text));
                let mut steps = vec![Step::new("AT+CTSP=1,3,2", delay::AFTER_SETUP)];
                steps.push(Step::new(
                    format!("AT+CTSDS=12,{sds_type},0,0,0"),
                    delay::AFTER_SETUP,
                ));
                steps.push(Step::new(
                    format!("AT+CMGS={dest},{}", pdu.len() * 4),
                    delay::AFTER_CMGS,
                ));
                steps.push(Step::immediate(format!("{pdu}{SUB}")));
                steps
            }
            Command::Ack { dest, mode } => match mode {
                AckMode::None => Vec::new(),
                AckMode::Text => vec![Step::immediate(format!(
                    "AT+CTSDSW={dest},1,\"{}\"",
                    ack::TEXT
                ))],
                AckMode::Status => vec![Step::immediate(format!(
                    "AT+CTSDSW={dest},2,\"{}\"",
                    ack::STATUS
                ))],
            },
            Command::SelectTalkGroup(tg) => vec![Step::immediate(format!("AT+CTGS=1,{tg}"))],
            Command::Init(commands) if commands.is_empty() => DEFAULT_INIT_COMMANDS
                .iter()
                .map(|c| Step::new(*c, delay::AFTER_SETUP))
                .collect(),
            Command::Init(commands) => commands
                .iter()
                .map(|c| Step::new(c.as_str(), delay::AFTER_SETUP))
                .collect(),
            Command::EnableTnp1Profiles => (0..TNP1_PROFILES)
                .map(|i| Step::new(format!("AT+CTSP=1,{i},1"), delay::AFTER_PROFILE))
                .collect(),
            Command::Raw(line) => vec![Step::immediate(line.as_str())],
        }
    }
}

/// `AT+CTSDS` mode, `AT+CMGS` with the bit length, then the payload.
fn sds_steps(dest: &str, payload: &str, sds_type: u8) -> Vec<Step> {
    vec![
        Step::new(
            format!("AT+CTSDS=12,{sds_type},0,0,0"),
            delay::AFTER_SDS_MODE,
        ),
        Step::new(
            format!("AT+CMGS={dest},{}", payload.len() * 4),
            delay::AFTER_CMGS,
        ),
        Step::immediate(format!("{payload}{SUB}")),
    ]
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::RequestPosition { dest, kind } => write!(f, "{kind:?} request to {dest}"),
            Command::SendText { dest, text, .. } => write!(f, "text to {dest}: {text}"),
            Command::SendHex { dest, hex, .. } => write!(f, "SDS to {dest}: {hex}"),
            Command::Ack { dest, mode } => write!(f, "{mode:?} ack to {dest}"),
            Command::SelectTalkGroup(tg) => write!(f, "select TG {tg}"),
            Command::Init(commands) if commands.is_empty() => write!(f, "default init"),
            Command::Init(commands) => write!(f, "init ({} commands)", commands.len()),
            Command::EnableTnp1Profiles => write!(f, "enable TNP1 profiles"),
            Command::Raw(line) => write!(f, "{line}"),
        }
    }
}
