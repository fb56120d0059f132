use std::collections::BTreeMap;

use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;

use tetra_protocol::{DeviceId, Event, TriggerAction};

use crate::message::{DeviceCommand, DeviceEvent};

/// Command channels of all running device tasks.
#[derive(Debug, Default)]
pub struct Router {
    devices: BTreeMap<DeviceId, UnboundedSender<DeviceCommand>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: DeviceId, commands: UnboundedSender<DeviceCommand>) {
        self.devices.insert(device, commands);
    }

    pub fn remove(&mut self, device: DeviceId) {
        self.devices.remove(&device);
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Send a command to one device. Returns false if the device is not running.
    pub fn send(&self, device: DeviceId, command: DeviceCommand) -> bool {
        match self.devices.get(&device) {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// Act on events that concern other devices. Returns true if the event
    /// was a trigger that reached its target.
    pub fn route(&self, event: &DeviceEvent) -> bool {
        match event {
            DeviceEvent::Decoded {
                device,
                event: Event::Trigger(action),
            } => self.fire(*device, action),
            _ => false,
        }
    }

    fn fire(&self, source: DeviceId, action: &TriggerAction) -> bool {
        let sent = self.send(
            action.target_device,
            DeviceCommand::RunProfile(action.automation.clone()),
        );
        if sent {
            info!(
                "trigger from device {} runs {} on device {}",
                source, action.automation, action.target_device
            );
        } else {
            warn!(
                "trigger target device {} is not connected, {} skipped",
                action.target_device, action.automation
            );
        }
        sent
    }

    pub fn quit_all(&self) {
        for tx in self.devices.values() {
            let _ = tx.send(DeviceCommand::Quit);
        }
    }
}
