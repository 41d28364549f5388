//! The serial link to the load bank's microcontroller.
//!
//! A [`Link`] owns the port. Commands are written synchronously from the caller's thread, while a
//! single background reader thread splits incoming data into lines and hands each one to an
//! [`Observer`].

mod lines;
mod port;
mod reader;

pub use lines::LineBuffer;
pub use port::{open_serial_port, OpenPortFn, Port, READ_TIMEOUT};

use futures::channel::mpsc::UnboundedSender;
use serialport::SerialPort;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use reader::Reader;

/// The baud rate the load bank firmware talks at.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Errors reported by the serial link.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The port could not be opened.
    #[error("failed to connect to {port}: {detail}")]
    ConnectionFailed { port: String, detail: String },
    /// The device went away while the link was open.
    #[error("device disconnected: {detail}")]
    Disconnected { detail: String },
    /// A command could not be written.
    #[error("cannot send command: {reason}")]
    SendFailed { reason: String },
    /// The port is open, but a second handle to it for the reader could not be made.
    #[error("failed to start the serial reader: {detail}")]
    ReaderFailed { detail: String },
    /// An operation needed an open link.
    #[error("the serial link is not connected")]
    NotConnected,
}

/// The state of the serial link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Not opened yet, or closed on request.
    Closed,
    /// The port is open and the device is answering.
    Connected,
    /// The device went away while the link was open. The link is not reopened automatically.
    Disconnected,
}

/// Something that happened on the link, delivered to an [`Observer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A non-empty line was received from the device.
    Line(String),
    /// The link failed.
    Error(LinkError),
}

/// Receives [`LinkEvent`]s. Notifications come from the reader thread as well as from the thread
/// that owns the [`Link`], so implementations must be thread safe.
pub trait Observer: Send + Sync {
    fn notify(&self, event: LinkEvent);
}

/// Forwards events to the receiving end of the channel, typically the task that drives the UI.
impl Observer for UnboundedSender<LinkEvent> {
    fn notify(&self, event: LinkEvent) {
        // Fails only if the receiver was dropped
        let _ = self.unbounded_send(event);
    }
}

/// Where and how fast to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSettings {
    /// The serial port's path or name, e.g. `/dev/ttyACM0` or `COM7`.
    pub path: String,
    pub baud_rate: u32,
}

impl LinkSettings {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        LinkSettings {
            path: path.into(),
            baud_rate,
        }
    }
}

/// Returned by [`Link::open`] on success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connected {
    pub path: String,
    pub baud_rate: u32,
}

/// The handle to a running reader thread.
struct ReaderHandle {
    /// Signals the reader to stop.
    terminate_tx: watch::Sender<()>,
    thread: JoinHandle<()>,
}

/// The serial link to the load bank. See the [module documentation][self].
pub struct Link {
    settings: LinkSettings,
    /// The function used to open the port.
    open_fn: OpenPortFn,
    /// The port used for writing, if the link is open.
    port: Option<Port>,
    /// The state of the link, shared with the reader thread.
    state: Arc<watch::Sender<LinkState>>,
    observer: Option<Arc<dyn Observer>>,
    reader: Option<ReaderHandle>,
    /// The last command written to the device.
    last_sent: Option<String>,
    /// The last line received from the device, written by the reader thread.
    last_received: Arc<Mutex<Option<String>>>,
}

impl Link {
    /// Returns a closed `Link` that will use the system serial port described by `settings`.
    pub fn new(settings: LinkSettings) -> Self {
        Link::with_open_fn(settings, open_serial_port)
    }

    /// Like [`new`][Self::new], but uses a custom function for opening the serial port.
    pub fn with_open_fn<F>(settings: LinkSettings, open_fn: F) -> Self
    where
        F: Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(LinkState::Closed);

        Link {
            settings,
            open_fn: Box::new(open_fn),
            port: None,
            state: Arc::new(state),
            observer: None,
            reader: None,
            last_sent: None,
            last_received: Arc::new(Mutex::new(None)),
        }
    }

    /// Sets the observer that is told about connection failures and, once
    /// [`start_receiving`][Self::start_receiving] is called, about incoming lines.
    pub fn register_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observer = Some(observer);
    }

    /// Opens the serial port. On failure the error is also reported to the registered observer and
    /// the link stays closed; it is not retried.
    pub fn open(&mut self) -> Result<Connected, LinkError> {
        if self.port.is_some() && self.state() == LinkState::Connected {
            return Ok(self.connected());
        }

        // Clean up after a previous disconnection
        self.close();

        let LinkSettings { ref path, baud_rate } = self.settings;

        match Port::open(path, baud_rate, &self.open_fn) {
            Ok(port) => {
                info!("Connected to the load bank on {} at {} baud", path, baud_rate);
                self.port = Some(port);
                self.state.send_replace(LinkState::Connected);
                Ok(self.connected())
            }
            Err(e) => {
                let error = LinkError::ConnectionFailed {
                    port: path.clone(),
                    detail: e.to_string(),
                };
                error!("{}", error);
                self.report(LinkEvent::Error(error.clone()));
                Err(error)
            }
        }
    }

    /// Starts the background reader, which delivers every non-empty line received from the device
    /// to `observer` in arrival order until the link is closed or the device disconnects.
    ///
    /// `observer` also becomes the registered observer. A reader that is already running is
    /// stopped first.
    pub fn start_receiving(&mut self, observer: Arc<dyn Observer>) -> Result<(), LinkError> {
        self.register_observer(observer.clone());
        self.stop_reader();

        let port = match self.port {
            Some(ref p) if self.state() == LinkState::Connected => p,
            _ => return Err(LinkError::NotConnected),
        };
        let reader_port = port.try_clone().map_err(|e| LinkError::ReaderFailed {
            detail: e.to_string(),
        })?;

        let (terminate_tx, terminate_rx) = watch::channel(());
        let reader = Reader::new(
            reader_port,
            observer,
            self.state.clone(),
            self.last_received.clone(),
            terminate_rx,
        );
        let thread = thread::spawn(|| reader.run());

        self.reader = Some(ReaderHandle {
            terminate_tx,
            thread,
        });

        Ok(())
    }

    /// Writes `command` to the device, terminated by exactly one newline.
    ///
    /// If the link is not connected, nothing is written or recorded and the observer is not
    /// notified; the failure is only logged and returned.
    pub fn send(&mut self, command: &str) -> Result<(), LinkError> {
        let command = normalize_command(command);
        let connected = self.state() == LinkState::Connected;

        let port = match self.port {
            Some(ref mut p) if connected => p,
            _ => {
                warn!("Serial link is not connected, cannot send {:?}", command);
                return Err(LinkError::SendFailed {
                    reason: "the serial link is not connected".to_string(),
                });
            }
        };

        if let Err(e) = port.write_all(command.as_bytes()).and_then(|_| port.flush()) {
            warn!("Failed to send {:?}: {}", command, e);
            return Err(LinkError::SendFailed {
                reason: e.to_string(),
            });
        }

        info!("Sent command: {:?}", command);
        self.last_sent = Some(command);

        Ok(())
    }

    /// Stops the reader thread, waits for it to exit and closes the port.
    pub fn close(&mut self) {
        self.stop_reader();

        if self.port.take().is_some() {
            info!("Closed the serial link on {}", self.settings.path);
        }

        self.state.send_replace(LinkState::Closed);
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Returns a receiver that is notified of every change of the link's state.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Returns the last command successfully written, including its newline.
    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    /// Returns the last line received from the device.
    pub fn last_received(&self) -> Option<String> {
        self.last_received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn connected(&self) -> Connected {
        Connected {
            path: self.settings.path.clone(),
            baud_rate: self.settings.baud_rate,
        }
    }

    fn report(&self, event: LinkEvent) {
        if let Some(ref observer) = self.observer {
            observer.notify(event);
        }
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            // Fails only if the reader already exited
            let _ = reader.terminate_tx.send(());

            if reader.thread.join().is_err() {
                error!("The serial reader thread panicked");
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Returns the names of the serial ports available on this system.
pub fn available_ports() -> serialport::Result<Vec<String>> {
    serialport::available_ports().map(|ports| ports.into_iter().map(|p| p.port_name).collect())
}

/// Makes `command` end with exactly one newline.
fn normalize_command(command: &str) -> String {
    format!("{}\n", command.trim_end_matches(|c| c == '\r' || c == '\n'))
}
