//! # Meshtastic Device Communication Module
//!
//! Line sources for the tracker: the firmware debug console over a serial
//! port, a captured console log replayed from disk, and the radio library's
//! node table export ([`node_table`]).
//!
//! ## Serial console
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use meshtrack::meshtastic::{LineRead, LineSource, SerialLineSource};
//!
//! let mut source = SerialLineSource::open("/dev/ttyUSB0", 115200, 1000)?;
//! loop {
//!     match source.read_line()? {
//!         LineRead::Line(line) => println!("{}", line),
//!         LineRead::Idle => continue,
//!         LineRead::Closed => break,
//!     }
//! }
//! # }
//! # Ok::<(), meshtrack::errors::TransportError>(())
//! ```
//!
//! Reads use a bounded timeout; a timeout is reported as [`LineRead::Idle`]
//! rather than an error so callers can keep polling.
//!
//! ## Reader thread
//!
//! [`spawn_line_reader`] runs a source on a dedicated OS thread and forwards
//! each line into an unbounded tokio channel. There is no backpressure: if the
//! consumer is slower than the radio, lines queue in memory. Transport
//! failures end the thread and are published on the connection status watch;
//! reconnecting is an explicit user action.
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! read_timeout_ms = 1000
//! ```

pub mod framer;
pub mod node_table;

use crate::errors::TransportError;
use crate::logutil::escape_log;
use framer::LineFramer;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::collections::VecDeque;
#[cfg(feature = "serial")]
use std::io::Read;
#[cfg(feature = "serial")]
use std::time::Duration;

/// Outcome of one read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// Nothing arrived before the read timeout.
    Idle,
    /// The source is exhausted (end of a replay file).
    Closed,
}

/// A transport that yields text lines.
pub trait LineSource: Send {
    /// Human readable name for logs and status (`/dev/ttyUSB0`, a file path).
    fn describe(&self) -> String;

    /// Block until a line is available, the read times out, or the source ends.
    fn read_line(&mut self) -> Result<LineRead, TransportError>;
}

/// Connection state of the serial console, as shown by `/api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting { port: String },
    Connected { port: String },
    Failed { port: String, reason: String },
}

/// Serial port console source.
#[cfg(feature = "serial")]
pub struct SerialLineSource {
    port_name: String,
    port: Box<dyn SerialPort>,
    framer: LineFramer,
    pending: VecDeque<String>,
}

#[cfg(feature = "serial")]
impl SerialLineSource {
    /// Open `port_name` at 8N1 with a `timeout_ms` read timeout.
    pub fn open(port_name: &str, baud_rate: u32, timeout_ms: u64) -> Result<Self, TransportError> {
        info!(
            "Opening Meshtastic console on {} at {} baud",
            port_name, baud_rate
        );
        let mut builder =
            serialport::new(port_name, baud_rate).timeout(Duration::from_millis(timeout_ms.max(1)));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open().map_err(|e| TransportError::Open {
            port: port_name.to_string(),
            reason: e.to_string(),
        })?;
        // Toggle DTR/RTS so ESP32 based boards wake up and start logging
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        Ok(SerialLineSource {
            port_name: port_name.to_string(),
            port,
            framer: LineFramer::new(),
            pending: VecDeque::new(),
        })
    }
}

#[cfg(feature = "serial")]
impl LineSource for SerialLineSource {
    fn describe(&self) -> String {
        self.port_name.clone()
    }

    fn read_line(&mut self) -> Result<LineRead, TransportError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(LineRead::Line(line));
        }
        let mut buffer = [0u8; 1024];
        match self.port.read(&mut buffer) {
            Ok(0) => Ok(LineRead::Idle),
            Ok(n) => {
                self.framer.push(&buffer[..n]);
                while let Some(line) = self.framer.next_line() {
                    self.pending.push_back(line);
                }
                Ok(self
                    .pending
                    .pop_front()
                    .map(LineRead::Line)
                    .unwrap_or(LineRead::Idle))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(LineRead::Idle),
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                debug!("Serial read interrupted (EINTR), retrying");
                Ok(LineRead::Idle)
            }
            Err(e) => Err(TransportError::Read {
                port: self.port_name.clone(),
                source: e,
            }),
        }
    }
}

/// Open the serial console, or report that serial support is not built in.
pub fn open_serial(
    port_name: &str,
    baud_rate: u32,
    timeout_ms: u64,
) -> Result<Box<dyn LineSource>, TransportError> {
    #[cfg(feature = "serial")]
    {
        Ok(Box::new(SerialLineSource::open(
            port_name, baud_rate, timeout_ms,
        )?))
    }
    #[cfg(not(feature = "serial"))]
    {
        let _ = (port_name, baud_rate, timeout_ms);
        Err(TransportError::Unsupported)
    }
}

/// Serial ports visible to the OS.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    #[cfg(feature = "serial")]
    {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .map_err(|e| TransportError::Open {
                port: "<enumerate>".to_string(),
                reason: e.to_string(),
            })
    }
    #[cfg(not(feature = "serial"))]
    {
        Ok(Vec::new())
    }
}

/// First available serial port, for connecting without an explicit port.
pub fn first_available_port() -> Result<String, TransportError> {
    list_ports()?.into_iter().next().ok_or(TransportError::NoPorts)
}

/// Replays a captured console log (any `BufRead`) line by line.
pub struct ReplayLineSource<R> {
    name: String,
    reader: R,
    framer: LineFramer,
    done: bool,
}

impl ReplayLineSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TransportError::Open {
            port: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_reader(path.display().to_string(), BufReader::new(file)))
    }
}

impl<R: BufRead> ReplayLineSource<R> {
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            framer: LineFramer::new(),
            done: false,
        }
    }
}

impl<R: BufRead + Send> LineSource for ReplayLineSource<R> {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn read_line(&mut self) -> Result<LineRead, TransportError> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Ok(LineRead::Line(line));
            }
            if self.done {
                return Ok(self
                    .framer
                    .finish()
                    .map(LineRead::Line)
                    .unwrap_or(LineRead::Closed));
            }
            let mut chunk = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut chunk)
                .map_err(|e| TransportError::Read {
                    port: self.name.clone(),
                    source: e,
                })?;
            if n == 0 {
                self.done = true;
            } else {
                self.framer.push(&chunk);
            }
        }
    }
}

/// Run `source` on its own thread, forwarding lines into `tx`.
///
/// The thread ends when the source closes, the transport fails, or every
/// receiver is gone. Status transitions are published on `status`.
pub fn spawn_line_reader(
    mut source: Box<dyn LineSource>,
    tx: mpsc::UnboundedSender<String>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    echo_lines: bool,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let port = source.describe();
    std::thread::Builder::new()
        .name(format!("line-reader:{}", port))
        .spawn(move || {
            status.send_replace(ConnectionStatus::Connected { port: port.clone() });
            info!("Reading console lines from {}", port);
            loop {
                match source.read_line() {
                    Ok(LineRead::Line(line)) => {
                        if echo_lines {
                            debug!("<{}> {}", port, escape_log(&line));
                        }
                        if tx.send(line).is_err() {
                            warn!("Line consumer gone; stopping reader for {}", port);
                            status.send_replace(ConnectionStatus::Disconnected);
                            break;
                        }
                    }
                    Ok(LineRead::Idle) => {}
                    Ok(LineRead::Closed) => {
                        info!("Line source {} closed", port);
                        status.send_replace(ConnectionStatus::Disconnected);
                        break;
                    }
                    Err(e) => {
                        error!("Transport error on {}: {}", port, e);
                        status.send_replace(ConnectionStatus::Failed {
                            port: port.clone(),
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replay_yields_lines_then_closes() {
        let data = b"first\r\n\n  second  \nthird".to_vec();
        let mut src = ReplayLineSource::from_reader("mem", Cursor::new(data));
        assert_eq!(src.read_line().unwrap(), LineRead::Line("first".into()));
        assert_eq!(src.read_line().unwrap(), LineRead::Line("second".into()));
        assert_eq!(src.read_line().unwrap(), LineRead::Line("third".into()));
        assert_eq!(src.read_line().unwrap(), LineRead::Closed);
        assert_eq!(src.read_line().unwrap(), LineRead::Closed);
    }

    #[tokio::test]
    async fn reader_thread_forwards_lines_and_reports_close() {
        let src = ReplayLineSource::from_reader("mem", Cursor::new(b"a\nb\n".to_vec()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let status_tx = Arc::new(status_tx);
        let handle = spawn_line_reader(Box::new(src), tx, status_tx, false).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
        assert_eq!(rx.recv().await, None);
        handle.join().unwrap();
        assert_eq!(*status_rx.borrow(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let s = ConnectionStatus::Failed {
            port: "/dev/ttyUSB0".into(),
            reason: "busy".into(),
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "busy");
    }
}
