use std::io;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::command::Command;
use crate::error::{Result, TetraError};
use crate::status::{self, TerminalReport};

use super::{LineReader, Transport, write_step};

/// Baud rate of the terminals' PEI port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default serial port settings.
const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;
const STOP_BITS: serialport::StopBits = serialport::StopBits::One;
const PARITY: serialport::Parity = serialport::Parity::None;

/// How long to wait for the terminal's answer to `AT+CNUMF?`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// A terminal transport backed by a native serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }

    /// A second handle to the same port, so reading and writing can run on
    /// separate threads.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::new(self.port.try_clone()?))
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }
}

/// Names of all serial ports on the system.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    for port in &ports {
        debug!("found port: {} ({:?})", port.port_name, port.port_type);
    }
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Open a serial port with terminal settings (8N1) at the given baud rate.
pub fn open_port(port_name: &str, baud_rate: u32) -> Result<SerialTransport> {
    let port = serialport::new(port_name, baud_rate)
        .data_bits(DATA_BITS)
        .stop_bits(STOP_BITS)
        .parity(PARITY)
        .timeout(Duration::from_millis(500))
        .open()
        .map_err(|e| match e.kind {
            serialport::ErrorKind::NoDevice => TetraError::PortNotFound(port_name.to_string()),
            _ => TetraError::Serial(e),
        })?;

    info!("opened {} at {} baud", port_name, baud_rate);
    Ok(SerialTransport::new(port))
}

/// Ask the terminal for its own number and return the ISSI.
///
/// Sends `AT+CNUMF?` and reads until `OK`. Fails with
/// [`TetraError::UnidentifiedTerminal`] if the answer carried no number and
/// with [`TetraError::Timeout`] if the terminal stayed silent.
pub fn identify_issi<T: Transport>(reader: &mut LineReader<T>) -> Result<String> {
    let query = Command::Raw("AT+CNUMF?".to_string());
    for step in query.steps() {
        write_step(reader.get_mut(), &step)?;
    }
    read_issi(reader, IDENTIFY_TIMEOUT)
}

fn read_issi<T: Transport>(reader: &mut LineReader<T>, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut issi = None;
    while Instant::now() < deadline {
        let Some(line) = reader.next_line()? else {
            continue;
        };
        match status::parse_line(&line) {
            Some(TerminalReport::OwnNumber { issi: number }) => {
                debug!("terminal reports ISSI {number}");
                issi = Some(number);
            }
            _ if line.trim() == "OK" => {
                return issi.ok_or(TetraError::UnidentifiedTerminal);
            }
            _ => {}
        }
    }
    match issi {
        Some(issi) => {
            warn!("no OK after CNUMF, using ISSI {issi}");
            Ok(issi)
        }
        None => Err(TetraError::Timeout),
    }
}
