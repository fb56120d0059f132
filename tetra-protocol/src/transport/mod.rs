use std::io;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::command::{Command, Step};

#[cfg(feature = "serial")]
pub mod serial;

/// A byte-oriented transport to a TETRA terminal's AT port.
///
/// Implementors provide read/write access to a serial-like connection.
/// The transport is synchronous and blocking.
pub trait Transport: Send {
    /// Write all bytes to the transport.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> io::Result<()>;

    /// Read bytes into the buffer. Returns the number of bytes read.
    /// Should return `Ok(0)` or `Err(TimedOut)` on timeout, not block forever.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Set the read timeout for subsequent `read()` calls.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Write one command step, terminated, and flush.
pub fn write_step<T: Transport + ?Sized>(transport: &mut T, step: &Step) -> io::Result<()> {
    trace!("TX {}", step.line.escape_debug());
    transport.write_all(&step.to_bytes())?;
    transport.flush()
}

/// Write a whole command, pausing after each step as the terminal expects.
pub fn send_command<T: Transport + ?Sized>(transport: &mut T, command: &Command) -> io::Result<()> {
    debug!("sending {command}");
    for step in &command.steps() {
        write_step(transport, step)?;
        if !step.delay_after.is_zero() {
            std::thread::sleep(step.delay_after);
        }
    }
    Ok(())
}

/// Lines longer than this are cut and passed on as they are.
const MAX_LINE_LEN: usize = 4096;

/// Splits a transport's byte stream into lines.
///
/// Lines end with `\n`; a preceding `\r` is dropped. Bytes are decoded as
/// Latin-1, the character set the terminal is switched to during init.
pub struct LineReader<T> {
    transport: T,
    buf: Vec<u8>,
}

impl<T: Transport> LineReader<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buf: Vec::new(),
        }
    }

    /// Return the next complete line, or `None` if the read timed out before
    /// one was complete. Partial input is kept for the next call.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let mut chunk = [0u8; 256];
            match self.transport.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn take_line(&mut self) -> Option<String> {
        let end = match self.buf.iter().position(|&b| b == b'\n') {
            Some(end) => end,
            None if self.buf.len() >= MAX_LINE_LEN => {
                warn!("line exceeds {MAX_LINE_LEN} bytes, passing it on cut");
                MAX_LINE_LEN
            }
            None => return None,
        };
        let raw: Vec<u8> = self.buf.drain(..end).collect();
        if self.buf.first() == Some(&b'\n') {
            self.buf.remove(0);
        }
        Some(decode_line(&raw))
    }
}

/// Decode one raw line as Latin-1, dropping a trailing `\r\n` or `\n`.
pub fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    raw.iter().copied().map(char::from).collect()
}
