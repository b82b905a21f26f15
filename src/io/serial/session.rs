// src/io/serial/session.rs
//
// Port session: one serial device opened exclusively and read-only.
// Converts timeout-driven reads into timestamped chunks. Never writes.

use std::io::{ErrorKind as IoErrorKind, Read};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort, SerialPortBuilder};
use tracing::{debug, info, warn};

use super::config::PortConfig;
use super::utils::{
    approximated_settings, to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits,
};
use crate::io::{now_us, Chunk, OpenErrorKind, OpenFailure, TapError};

/// Bytes requested per read call
const READ_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Traits
// ============================================================================

/// Result of one poll of a chunk source
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    /// At least one byte arrived
    Chunk(Chunk),
    /// The poll interval elapsed without data.
    /// `quiet` is the time since the last chunk, `None` before the first one.
    Idle { quiet: Option<Duration> },
    /// The source has no more data (finite sources only)
    EndOfStream,
}

/// A per-port byte source driven by a single pipeline.
///
/// `read_chunk` must return within a bounded poll interval so the pipeline
/// can observe cancellation. Errors are fatal for the port.
pub trait ChunkSource: Send {
    fn read_chunk(&mut self) -> Result<ReadOutcome, TapError>;
}

/// Opens chunk sources for configured ports
pub trait PortOpener: Send + Sync {
    type Source: ChunkSource + 'static;

    fn open(&self, config: &PortConfig) -> Result<Self::Source, OpenFailure>;
}

// ============================================================================
// Serial Session
// ============================================================================

/// An open serial device
pub struct PortSession {
    device_path: String,
    port: Box<dyn SerialPort>,
    buf: Vec<u8>,
    last_chunk_at: Option<Instant>,
}

impl PortSession {
    /// Open the device exclusively. `poll_interval` is the read timeout and
    /// bounds how long `read_chunk` can block.
    pub fn open(config: &PortConfig, poll_interval: Duration) -> Result<Self, OpenFailure> {
        let label = config.display_label();
        for note in approximated_settings(config.parity, config.stop_bits) {
            warn!("[Serial:{}] {}", label, note);
        }

        let builder = serialport::new(&config.device_path, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.byte_size))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .parity(to_serialport_parity(&config.parity))
            .timeout(poll_interval);

        let port = open_exclusive(builder)
            .map_err(|e| classify_open_error(&config.device_path, &e))?;

        // Bytes queued before the session started are not part of the capture
        if let Err(e) = port.clear(ClearBuffer::Input) {
            debug!("[Serial:{}] Could not flush input buffer: {}", label, e);
        }

        info!(
            "[Serial:{}] Opened {} at {} ({}) read-only",
            label,
            config.device_path,
            config.line_summary(),
            config.protocol
        );

        Ok(Self {
            device_path: config.device_path.clone(),
            port,
            buf: vec![0u8; READ_BUFFER_SIZE],
            last_chunk_at: None,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    fn quiet(&self) -> Option<Duration> {
        self.last_chunk_at.map(|at| at.elapsed())
    }
}

impl ChunkSource for PortSession {
    fn read_chunk(&mut self) -> Result<ReadOutcome, TapError> {
        match self.port.read(&mut self.buf) {
            Ok(n) if n > 0 => {
                let arrived = Instant::now();
                let gap = self.last_chunk_at.map(|prev| arrived.duration_since(prev));
                self.last_chunk_at = Some(arrived);
                Ok(ReadOutcome::Chunk(Chunk::new(
                    self.buf[..n].to_vec(),
                    now_us(),
                    gap,
                )))
            }
            // EOF - port closed/disconnected
            Ok(_) => Err(TapError::DeviceLost {
                device: self.device_path.clone(),
                reason: "end of file".to_string(),
            }),
            Err(ref e)
                if matches!(
                    e.kind(),
                    IoErrorKind::TimedOut | IoErrorKind::WouldBlock | IoErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle {
                    quiet: self.quiet(),
                })
            }
            Err(e) => Err(TapError::DeviceLost {
                device: self.device_path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(unix)]
fn open_exclusive(builder: SerialPortBuilder) -> serialport::Result<Box<dyn SerialPort>> {
    let mut port = builder.open_native()?;
    port.set_exclusive(true)?;
    Ok(Box::new(port))
}

// COM ports are exclusive by nature on Windows
#[cfg(not(unix))]
fn open_exclusive(builder: SerialPortBuilder) -> serialport::Result<Box<dyn SerialPort>> {
    builder.open()
}

/// Map a serialport open error onto the startup error taxonomy
pub fn classify_open_error(device_path: &str, error: &serialport::Error) -> OpenFailure {
    let message = error.to_string();
    let lowered = message.to_lowercase();

    let kind = if lowered.contains("busy")
        || lowered.contains("in use")
        || lowered.contains("locked")
        || (cfg!(windows) && lowered.contains("access is denied"))
    {
        OpenErrorKind::PortBusy
    } else {
        match error.kind() {
            serialport::ErrorKind::NoDevice => OpenErrorKind::PortNotFound,
            serialport::ErrorKind::Io(IoErrorKind::NotFound) => OpenErrorKind::PortNotFound,
            serialport::ErrorKind::Io(IoErrorKind::PermissionDenied) => {
                OpenErrorKind::PermissionDenied
            }
            _ if lowered.contains("no such file") || lowered.contains("not found") => {
                OpenErrorKind::PortNotFound
            }
            _ if lowered.contains("permission denied") => OpenErrorKind::PermissionDenied,
            _ => OpenErrorKind::Other,
        }
    };

    OpenFailure::new(device_path, kind, message)
}

/// Opens real serial devices
#[derive(Clone, Debug)]
pub struct SerialOpener {
    poll_interval: Duration,
}

impl SerialOpener {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl PortOpener for SerialOpener {
    type Source = PortSession;

    fn open(&self, config: &PortConfig) -> Result<PortSession, OpenFailure> {
        PortSession::open(config, self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: serialport::ErrorKind, description: &str) -> serialport::Error {
        serialport::Error::new(kind, description)
    }

    #[test]
    fn test_classify_busy_by_description() {
        let failure = classify_open_error(
            "/dev/ttyUSB1",
            &err(serialport::ErrorKind::Unknown, "Device or resource busy"),
        );
        assert_eq!(failure.kind, OpenErrorKind::PortBusy);
        assert_eq!(failure.device_path, "/dev/ttyUSB1");
    }

    #[test]
    fn test_classify_not_found() {
        let failure = classify_open_error(
            "/dev/ttyUSB9",
            &err(serialport::ErrorKind::NoDevice, "No such device"),
        );
        assert_eq!(failure.kind, OpenErrorKind::PortNotFound);

        let failure = classify_open_error(
            "/dev/ttyUSB9",
            &err(
                serialport::ErrorKind::Io(IoErrorKind::NotFound),
                "No such file or directory",
            ),
        );
        assert_eq!(failure.kind, OpenErrorKind::PortNotFound);
    }

    #[test]
    fn test_classify_permission_denied() {
        let failure = classify_open_error(
            "/dev/ttyS0",
            &err(
                serialport::ErrorKind::Io(IoErrorKind::PermissionDenied),
                "Permission denied",
            ),
        );
        assert_eq!(failure.kind, OpenErrorKind::PermissionDenied);
    }

    #[test]
    fn test_classify_other() {
        let failure = classify_open_error(
            "/dev/ttyS0",
            &err(serialport::ErrorKind::InvalidInput, "Invalid baud rate"),
        );
        assert_eq!(failure.kind, OpenErrorKind::Other);
        assert!(failure.message.contains("Invalid baud rate"));
    }

    #[test]
    fn test_open_missing_device_reports_path() {
        let config = PortConfig::new("/dev/serialtap-does-not-exist");
        let failure = PortSession::open(&config, Duration::from_millis(5))
            .err()
            .expect("open should fail");
        assert_eq!(failure.device_path, "/dev/serialtap-does-not-exist");
        assert_ne!(failure.kind, OpenErrorKind::PortBusy);
    }
}
