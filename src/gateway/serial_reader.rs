//! Line-oriented serial reader with automatic reconnection
//!
//! The USB link to the sensor board drops whenever the board resets or the
//! cable is pulled. [`SerialReader`] hides that: `connect` retries until the
//! port opens, and a failed read closes the port so the next `read_line`
//! reconnects. Only a missing serial driver is reported to the caller.

use crate::retry::{Failure, RetryPolicy};
use std::io::{self, BufRead, BufReader, Read};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Longest line kept; anything longer is dropped up to its newline
pub const MAX_LINE_BYTES: usize = 4096;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerialError {
    #[error("Failed to open serial port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Serial read error: {0}")]
    ReadFailed(String),

    /// The platform has no serial support at all; retrying cannot help
    #[error("Serial driver unavailable: {0}")]
    DriverUnavailable(String),
}

impl SerialError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SerialError::DriverUnavailable(_))
    }
}

/// Byte stream behind an open port
pub trait SerialLink: Read + Send {}

impl<T: Read + Send> SerialLink for T {}

/// Opens serial links; swapped out in tests
pub trait PortOpener: Send {
    fn open(
        &self,
        port: &str,
        baudrate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, SerialError>;
}

/// Real ports through the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn open(
        &self,
        port: &str,
        baudrate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, SerialError> {
        match serialport::new(port, baudrate).timeout(timeout).open() {
            Ok(link) => Ok(Box::new(link)),
            Err(e) if matches!(e.kind(), serialport::ErrorKind::Io(io::ErrorKind::Unsupported)) => {
                Err(SerialError::DriverUnavailable(e.to_string()))
            }
            Err(e) => Err(SerialError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

pub struct SerialReader {
    port: String,
    baudrate: u32,
    timeout: Duration,
    retry: RetryPolicy,
    opener: Box<dyn PortOpener>,
    link: Option<BufReader<Box<dyn SerialLink>>>,
    /// Bytes of a line whose newline has not arrived yet
    pending: Vec<u8>,
    /// Skipping the rest of an oversized line
    discarding: bool,
}

impl SerialReader {
    pub fn new(port: impl Into<String>, baudrate: u32, retry: RetryPolicy) -> Self {
        Self {
            port: port.into(),
            baudrate,
            timeout: Duration::from_secs(1),
            retry,
            opener: Box::new(SystemPorts),
            link: None,
            pending: Vec::new(),
            discarding: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_opener(mut self, opener: Box<dyn PortOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Block until the port is open.
    ///
    /// Returns early without a connection only when shutdown is requested.
    pub fn connect(&mut self) -> Result<(), SerialError> {
        if self.is_connected() {
            return Ok(());
        }
        let (port, baudrate, timeout) = (self.port.as_str(), self.baudrate, self.timeout);
        let opener = &self.opener;
        let opened = self.retry.run("Opening serial port", || {
            info!(port = %port, baudrate, "Opening serial port");
            opener.open(port, baudrate, timeout).map_err(|e| {
                if e.is_fatal() {
                    Failure::Fatal(e)
                } else {
                    Failure::Transient(e)
                }
            })
        })?;

        if let Some(link) = opened {
            self.link = Some(BufReader::new(link));
            self.pending.clear();
            self.discarding = false;
            info!(port = %self.port, "Serial connection established");
        }
        Ok(())
    }

    /// Read one trimmed line, waiting at most one read timeout in total.
    ///
    /// `Ok(None)` covers timeouts, blank lines, oversized lines and read
    /// failures. A line still incomplete at the deadline is kept for the next
    /// call. After a failure the port is closed and the next call reconnects.
    pub fn read_line(&mut self) -> Result<Option<String>, SerialError> {
        if !self.is_connected() {
            self.connect()?;
        }
        let Some(reader) = self.link.as_mut() else {
            return Ok(None);
        };

        let deadline = Instant::now() + self.timeout;
        let outcome = loop {
            let complete = match reader.fill_buf() {
                Ok([]) => {
                    break Err(SerialError::ReadFailed(
                        "port reached end of stream".to_string(),
                    ))
                }
                Ok(available) => {
                    let newline = available.iter().position(|&b| b == b'\n');
                    let used = newline.map_or(available.len(), |i| i + 1);
                    if !self.discarding {
                        self.pending.extend_from_slice(&available[..used]);
                    }
                    reader.consume(used);
                    newline.is_some()
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    break Ok(false)
                }
                Err(e) => break Err(SerialError::ReadFailed(e.to_string())),
            };

            if !self.discarding && self.pending.len() > MAX_LINE_BYTES {
                warn!(
                    port = %self.port,
                    "Dropping serial line longer than {} bytes", MAX_LINE_BYTES
                );
                self.pending.clear();
                self.discarding = true;
            }
            if complete {
                if self.discarding {
                    self.discarding = false;
                    break Ok(false);
                }
                break Ok(true);
            }
            if Instant::now() >= deadline {
                break Ok(false);
            }
        };

        match outcome {
            Ok(true) => Ok(self.take_line()),
            Ok(false) => Ok(None),
            Err(e) => {
                self.fail(e);
                Ok(None)
            }
        }
    }

    /// Idempotent
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            info!(port = %self.port, "Closing serial connection");
        }
        self.pending.clear();
        self.discarding = false;
    }

    fn take_line(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&bytes).trim().to_string();
        if line.is_empty() {
            return None;
        }
        debug!("Read from serial: {}", line);
        Some(line)
    }

    fn fail(&mut self, err: SerialError) {
        error!(port = %self.port, error = %err, "Serial read failed");
        self.close();
        self.retry.pause();
    }
}

impl std::fmt::Debug for SerialReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialReader")
            .field("port", &self.port)
            .field("baudrate", &self.baudrate)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending.len())
            .finish()
    }
}
