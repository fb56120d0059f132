use thiserror::Error;

pub type Result<T> = std::result::Result<T, TetraError>;

#[derive(Debug, Error)]
pub enum TetraError {
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port {0} not found")]
    PortNotFound(String),

    #[error("timeout waiting for terminal")]
    Timeout,

    #[error("terminal did not report its ISSI")]
    UnidentifiedTerminal,
}
