use std::fmt;

pub mod calls;
pub mod classify;
pub mod command;
pub mod engine;
pub mod error;
pub mod hex;
pub mod lip;
pub mod reassembler;
pub mod retry;
pub mod status;
pub mod transport;
pub mod triggers;

pub use calls::{CallCorrelator, GroupActivity};
pub use classify::{ClassifierConfig, Message};
pub use command::{AckMode, Command, PositionKind};
pub use engine::{Engine, EngineConfig, Event};
pub use error::{Result, TetraError};
pub use lip::{CompactCalibration, Encoding, PositionFix};
pub use reassembler::{Reassembler, Record};
pub use retry::{PositionRequest, RetryPolicy, RetryState};
pub use status::{CellEntry, TerminalReport};
pub use triggers::{TriggerAction, TriggerRule, TriggerRules};

/// Identifies one connected terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u8);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
