//! A control panel for a relay load bank. Relays are toggled over a serial link to the bank's
//! microcontroller, and the panel keeps track of which resistive loads are switched in, the
//! resulting equivalent resistance and the current drawn from the supply.

pub mod channel;
pub mod link;
pub mod logger;
pub mod panel;
pub mod tracker;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{pin_mut, select, Future, FutureExt, StreamExt};
use tokio::signal;
use tracing::{debug, error, info, warn};

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use crate::link::{Link, LinkSettings, Observer};
use crate::panel::{parse_input, InputError, Panel};
use crate::tracker::{LoadBank, Tracker};

pub use crate::channel::{Channel, ChannelId, SUPPLY_VOLTAGE};
pub use crate::link::{LinkError, LinkEvent, LinkState};
pub use crate::tracker::{LoadState, TrackerError};

/// Runs the panel for the reference load bank on the serial port described by `settings`, reading
/// commands from stdin until the operator quits, stdin closes or ctrl-c is pressed.
///
/// A port that cannot be opened is reported on the panel rather than returned; the panel still
/// runs so that the relay bookkeeping can be used offline.
pub async fn launch(settings: LinkSettings) -> io::Result<()> {
    info!("Serial port: {} at {} baud", settings.path, settings.baud_rate);

    // Link events are marshalled onto this task through the channel
    let (events_tx, events_rx) = mpsc::unbounded::<LinkEvent>();
    let observer: Arc<dyn Observer> = Arc::new(events_tx);

    let mut link = Link::new(settings);
    link.register_observer(observer.clone());
    if link.open().is_ok() {
        if let Err(e) = link.start_receiving(observer) {
            warn!("Failed to start the serial reader: {}", e);
        }
    }

    // The stdin thread is never joined: a blocking read cannot be interrupted, and the thread is
    // discarded when the process exits
    let (input_tx, input_rx) = mpsc::unbounded::<String>();
    thread::spawn(move || read_stdin(input_tx));

    let shutdown = signal::ctrl_c().map(|res| {
        if let Err(e) = res {
            error!("Failed to wait for ctrl-c signal: {}", e);
        }
    });

    let mut panel = Panel::new(Tracker::new(LoadBank::reference()), link, io::stdout());
    run(&mut panel, input_rx, events_rx, shutdown).await?;

    panel.link_mut().close();
    info!("Shutting down");

    Ok(())
}

/// Drives `panel` with lines typed by the operator and events from the link until the operator
/// quits, `input` closes or `shutdown` completes.
///
/// The status is shown once at the start, and again whenever the link reports that the device
/// disconnected.
pub async fn run<W, F>(
    panel: &mut Panel<W>,
    mut input: UnboundedReceiver<String>,
    mut events: UnboundedReceiver<LinkEvent>,
    shutdown: F,
) -> io::Result<()>
where
    W: Write,
    F: Future<Output = ()>,
{
    panel.render_status()?;

    let mut link_state = panel.link().subscribe();
    let shutdown = shutdown.fuse();
    pin_mut!(shutdown);

    loop {
        select! {
            line = input.next() => {
                let line = match line {
                    Some(l) => l,
                    // stdin closed
                    None => break,
                };

                match parse_input(&line) {
                    Ok(command) => {
                        if !panel.handle_input(command)? {
                            break;
                        }
                    }
                    Err(InputError::Empty) => {},
                    Err(e) => panel.handle_input_error(&e)?,
                }
            },
            event = events.next() => {
                if let Some(event) = event {
                    panel.handle_event(event)?;
                }
            },
            changed = link_state.changed().fuse() => {
                // The sender lives in the panel's link, so it outlives this loop
                if changed.is_ok() && panel.link().state() == LinkState::Disconnected {
                    panel.render_status()?;
                }
            },
            () = shutdown => break,
        }
    }

    Ok(())
}

/// Forwards lines read from stdin until stdin closes or the receiver is dropped.
fn read_stdin(tx: UnboundedSender<String>) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        if tx.unbounded_send(line).is_err() {
            break;
        }
    }

    debug!("Stopped reading stdin");
}

#[cfg(test)]
mod tests {
    use futures::future;
    use mock::serial::TestPort;
    use tokio::time;

    use std::time::Duration;

    use super::*;
    use crate::link::DEFAULT_BAUD_RATE;

    /// Returns a panel whose link is connected to `test_port` and receiving, and the receiver for
    /// its events.
    fn connected_panel(test_port: &TestPort) -> (Panel<Vec<u8>>, UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded::<LinkEvent>();
        let mut link = Link::with_open_fn(
            LinkSettings::new("fakeport", DEFAULT_BAUD_RATE),
            mock::open_test_port(test_port),
        );
        link.open().unwrap();
        link.start_receiving(Arc::new(tx)).unwrap();

        (Panel::new(Tracker::new(LoadBank::reference()), link, Vec::new()), rx)
    }

    fn output(panel: &Panel<Vec<u8>>) -> String {
        String::from_utf8(panel.output().clone()).unwrap()
    }

    #[tokio::test]
    async fn test_run_stops_when_input_closes() {
        let test_port = TestPort::new().unwrap();
        let (mut panel, events) = connected_panel(&test_port);
        let (input_tx, input) = mpsc::unbounded::<String>();

        input_tx.unbounded_send("3".to_string()).unwrap();
        drop(input_tx);

        time::timeout(Duration::from_secs(1), run(&mut panel, input, events, future::pending()))
            .await
            .unwrap()
            .unwrap();

        assert!(panel.tracker().state().is_on(ChannelId(3)));
        assert_eq!(b"toggle 3\n".to_vec(), test_port.written());
    }

    #[tokio::test]
    async fn test_run_stops_on_quit() {
        let test_port = TestPort::new().unwrap();
        let (mut panel, events) = connected_panel(&test_port);
        let (input_tx, input) = mpsc::unbounded::<String>();

        // The sender stays alive, so only the quit command can end the loop
        input_tx.unbounded_send("".to_string()).unwrap();
        input_tx.unbounded_send("quit".to_string()).unwrap();

        time::timeout(Duration::from_secs(1), run(&mut panel, input, events, future::pending()))
            .await
            .unwrap()
            .unwrap();

        assert!(output(&panel).starts_with("Relay load bank on fakeport (connected)\n"));
        assert!(test_port.written().is_empty());
        drop(input_tx);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let test_port = TestPort::new().unwrap();
        let (mut panel, events) = connected_panel(&test_port);
        let (_input_tx, input) = mpsc::unbounded::<String>();

        time::timeout(Duration::from_secs(1), run(&mut panel, input, events, future::ready(())))
            .await
            .unwrap()
            .unwrap();

        assert!(test_port.written().is_empty());
    }

    #[tokio::test]
    async fn test_run_shows_disconnection() {
        let test_port = TestPort::new().unwrap();
        let (mut panel, events) = connected_panel(&test_port);
        let (input_tx, input) = mpsc::unbounded::<String>();

        test_port.set_has_error(true);

        // End the loop once the disconnection has had time to arrive
        let shutdown = time::sleep(Duration::from_millis(200));
        time::timeout(Duration::from_secs(1), run(&mut panel, input, events, shutdown))
            .await
            .unwrap()
            .unwrap();
        drop(input_tx);

        let output = output(&panel);
        assert!(output.contains("!! device disconnected: "));
        assert!(output.contains("Relay load bank on fakeport (disconnected)\n"));
    }
}
