pub mod automation;
pub mod config;
pub mod device_task;
pub mod discovery;
pub mod message;
pub mod replay;
pub mod router;

pub use automation::Profiles;
pub use config::{AppConfig, ConfigError, ConfigWatcher, DeviceConfig};
pub use device_task::DeviceTask;
pub use message::{DeviceCommand, DeviceEvent};
pub use router::Router;
