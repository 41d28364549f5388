//! The background reader for the serial link.

use tokio::sync::watch::{Receiver, Sender};
use tracing::{debug, error};

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use super::{LineBuffer, LinkError, LinkEvent, LinkState, Observer, Port};

/// Reads from the serial port, forwarding each received line to an [`Observer`].
///
/// The reader stops when `terminate_rx` is signalled (or its sender is dropped) or when the port
/// fails. A failure is reported to the observer as [`LinkError::Disconnected`] exactly once.
pub struct Reader {
    /// A handle to the serial port, cloned from the one the link writes to.
    port: Port,
    /// Incoming data that does not form a complete line yet.
    lines: LineBuffer,
    /// A buffer for reading data from the serial port.
    read_buf: Vec<u8>,
    observer: Arc<dyn Observer>,
    /// The link state, set to [`LinkState::Disconnected`] if the port fails.
    state_tx: Arc<Sender<LinkState>>,
    last_received: Arc<Mutex<Option<String>>>,
    /// A receiver for termination signals.
    terminate_rx: Receiver<()>,
}

impl Reader {
    pub fn new(
        port: Port,
        observer: Arc<dyn Observer>,
        state_tx: Arc<Sender<LinkState>>,
        last_received: Arc<Mutex<Option<String>>>,
        terminate_rx: Receiver<()>,
    ) -> Self {
        Reader {
            port,
            lines: LineBuffer::new(),
            read_buf: vec![0; 256],
            observer,
            state_tx,
            last_received,
            terminate_rx,
        }
    }

    /// Runs the read loop.
    ///
    /// A separate thread must be used for this as it blocks until the reader stops.
    pub fn run(mut self) {
        loop {
            // Watch for termination signal
            if self.terminate_rx.has_changed().unwrap_or(true) {
                debug!("Serial reader stopping");
                break;
            }

            if let Err(e) = self.process_input() {
                self.on_device_disconnected(e);
                break;
            }
        }
    }

    /// Reads whatever the device has sent and forwards complete lines. Returns `Err` if the
    /// serial port could not be accessed.
    fn process_input(&mut self) -> io::Result<()> {
        match self.port.read(&mut self.read_buf) {
            Ok(bytes) => {
                for line in self.lines.push(&self.read_buf[..bytes]) {
                    self.on_line(line);
                }
            }
            Err(e) => match e.kind() {
                // Ignore temporary read failures
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut => {},
                _ => return Err(e),
            }
        }

        Ok(())
    }

    fn on_line(&mut self, line: String) {
        debug!("Received line: {:?}", line);
        *self.last_received.lock().unwrap_or_else(|e| e.into_inner()) = Some(line.clone());
        self.observer.notify(LinkEvent::Line(line));
    }

    /// Updates the link state and notifies the observer that the device disconnected.
    fn on_device_disconnected(&mut self, e: io::Error) {
        error!("Device disconnected: {}", e);
        self.state_tx.send_replace(LinkState::Disconnected);
        self.observer.notify(LinkEvent::Error(LinkError::Disconnected {
            detail: e.to_string(),
        }));
    }
}
