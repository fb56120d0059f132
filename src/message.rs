use tetra_protocol::{Command, DeviceId, Event, PositionKind};

/// Commands sent to a device task.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// User-initiated position request. Restarts the retry cycle.
    RequestPosition { issi: String, kind: PositionKind },
    /// Run the AT commands of an automation profile.
    RunProfile(String),
    Send(Command),
    Quit,
}

/// Events sent from a device task.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected { device: DeviceId },
    Decoded { device: DeviceId, event: Event },
    Error { device: DeviceId, message: String },
    Disconnected { device: DeviceId },
}

impl DeviceEvent {
    pub fn device(&self) -> DeviceId {
        match self {
            DeviceEvent::Connected { device }
            | DeviceEvent::Decoded { device, .. }
            | DeviceEvent::Error { device, .. }
            | DeviceEvent::Disconnected { device } => *device,
        }
    }
}
