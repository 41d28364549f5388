//! The operator's panel: parses typed commands, drives the tracker and the link, and renders the
//! results as text.

use thiserror::Error;
use tracing::debug;

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::channel::ChannelId;
use crate::link::{Link, LinkEvent, LinkState};
use crate::tracker::{LoadState, Tracker};

pub const HELP: &str = "\
Commands:
  <n>, toggle <n>   toggle relay n
  send <text>       send a command to the load bank as typed
  status            show every relay and the load
  help              show this message
  quit              exit";

/// A command typed by the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Toggle(ChannelId),
    /// Send text to the device as a manual command.
    Send(String),
    Status,
    Help,
    Quit,
}

/// Errors from parsing the operator's commands.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("nothing was entered")]
    Empty,
    #[error("unknown command {0:?}, type `help` for a list")]
    UnknownCommand(String),
    #[error("{0:?} is not a relay number")]
    InvalidChannel(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
}

/// Parses one line typed by the operator.
pub fn parse_input(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Err(InputError::Empty),
        "toggle" | "t" => {
            if rest.is_empty() {
                Err(InputError::MissingArgument("toggle"))
            } else {
                parse_channel(rest).map(Input::Toggle)
            }
        }
        "send" => {
            if rest.is_empty() {
                Err(InputError::MissingArgument("send"))
            } else {
                Ok(Input::Send(rest.to_string()))
            }
        }
        "status" | "s" => Ok(Input::Status),
        "help" | "h" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        _ if word.starts_with(|c: char| c.is_ascii_digit()) => parse_channel(word).map(Input::Toggle),
        _ => Err(InputError::UnknownCommand(word.to_string())),
    }
}

fn parse_channel(s: &str) -> Result<ChannelId, InputError> {
    s.parse()
        .map(ChannelId)
        .map_err(|_| InputError::InvalidChannel(s.to_string()))
}

/// Returns the load line: the equivalent resistance to 3 decimal places and the current to 2.
pub fn render_load(state: &LoadState) -> String {
    format!(
        "Total resistance: {:.3} Ω   Total current: {:.2} A",
        state.equivalent_resistance(),
        state.current_amps(),
    )
}

/// Returns a description of every relay, the link and the load.
pub fn render_status(tracker: &Tracker, link_state: LinkState, port: &str) -> String {
    let link = match link_state {
        LinkState::Connected => "connected",
        LinkState::Disconnected => "disconnected",
        LinkState::Closed => "not connected",
    };

    let mut out = format!("Relay load bank on {} ({})\n", port, link);
    for channel in tracker.bank().channels() {
        let indicator = if tracker.state().is_on(channel.id) { "[ON ]" } else { "[off]" };
        // Writing to a `String` cannot fail
        let _ = writeln!(
            out,
            "  {} {:<16} {:>6.2} Ω",
            indicator, channel.label, channel.resistance,
        );
    }
    out.push_str(&render_load(tracker.state()));

    out
}

/// Ties the tracker and the link to an output, usually the terminal.
pub struct Panel<W: Write> {
    tracker: Tracker,
    link: Link,
    out: W,
}

impl<W: Write> Panel<W> {
    pub fn new(tracker: Tracker, link: Link, out: W) -> Self {
        Panel {
            tracker,
            link,
            out,
        }
    }

    /// Carries out a command. Returns `Ok(false)` if the operator asked to quit.
    pub fn handle_input(&mut self, input: Input) -> io::Result<bool> {
        debug!("Operator input: {:?}", input);

        match input {
            Input::Toggle(id) => self.toggle(id)?,
            Input::Send(command) => self.send(&command)?,
            Input::Status => self.render_status()?,
            Input::Help => writeln!(self.out, "{}", HELP)?,
            Input::Quit => return Ok(false),
        }

        Ok(true)
    }

    /// Shows an input that could not be parsed.
    pub fn handle_input_error(&mut self, error: &InputError) -> io::Result<()> {
        writeln!(self.out, "!! {}", error)
    }

    /// Shows something that happened on the link.
    pub fn handle_event(&mut self, event: LinkEvent) -> io::Result<()> {
        match event {
            LinkEvent::Line(line) => writeln!(self.out, "<< {}", line),
            LinkEvent::Error(e) => writeln!(self.out, "!! {}", e),
        }
    }

    pub fn render_status(&mut self) -> io::Result<()> {
        let status = render_status(&self.tracker, self.link.state(), &self.link.settings().path);
        writeln!(self.out, "{}", status)
    }

    /// Toggles a relay, sends its command and shows the new load. The tracked state changes even
    /// if the command could not be sent.
    fn toggle(&mut self, id: ChannelId) -> io::Result<()> {
        let command = match self.tracker.toggle(id) {
            Ok(channel) => channel.command.clone(),
            Err(e) => return writeln!(self.out, "!! {}", e),
        };

        self.send(&command)?;
        writeln!(self.out, "{}", render_load(self.tracker.state()))
    }

    fn send(&mut self, command: &str) -> io::Result<()> {
        match self.link.send(command) {
            Ok(()) => writeln!(self.out, ">> {}", command.trim_end()),
            Err(e) => writeln!(self.out, "!! {}", e),
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn output(&self) -> &W {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use mock::serial::TestPort;

    use super::*;
    use crate::link::{LinkError, LinkSettings, DEFAULT_BAUD_RATE};
    use crate::tracker::LoadBank;

    fn test_panel(test_port: Option<&TestPort>) -> Panel<Vec<u8>> {
        let settings = LinkSettings::new("fakeport", DEFAULT_BAUD_RATE);
        let mut link = match test_port {
            Some(p) => Link::with_open_fn(settings, mock::open_test_port(p)),
            None => Link::with_open_fn(settings, mock::open_missing_port()),
        };
        let _ = link.open();

        Panel::new(Tracker::new(LoadBank::reference()), link, Vec::new())
    }

    fn output(panel: &Panel<Vec<u8>>) -> String {
        String::from_utf8(panel.output().clone()).unwrap()
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(Ok(Input::Toggle(ChannelId(3))), parse_input("3"));
        assert_eq!(Ok(Input::Toggle(ChannelId(10))), parse_input("  toggle 10 "));
        assert_eq!(Ok(Input::Toggle(ChannelId(2))), parse_input("T 2"));
        assert_eq!(Ok(Input::Send("relay status".to_string())), parse_input("send relay status"));
        assert_eq!(Ok(Input::Status), parse_input("status"));
        assert_eq!(Ok(Input::Help), parse_input("?"));
        assert_eq!(Ok(Input::Quit), parse_input("exit"));
    }

    #[test]
    fn test_parse_input_errors() {
        assert_eq!(Err(InputError::Empty), parse_input("   "));
        assert_eq!(Err(InputError::MissingArgument("toggle")), parse_input("toggle"));
        assert_eq!(Err(InputError::MissingArgument("send")), parse_input("send  "));
        assert_eq!(Err(InputError::InvalidChannel("x".to_string())), parse_input("toggle x"));
        assert_eq!(Err(InputError::InvalidChannel("300".to_string())), parse_input("300"));
        assert_eq!(Err(InputError::UnknownCommand("reset".to_string())), parse_input("reset"));
    }

    #[test]
    fn test_render_load() {
        let bank = LoadBank::reference();
        let state = (1..=6).fold(LoadState::new(), |state, id| {
            crate::tracker::toggle(&bank, &state, ChannelId(id)).unwrap()
        });

        assert_eq!("Total resistance: 0.080 Ω   Total current: 181.25 A", render_load(&state));
        assert_eq!(
            "Total resistance: 0.000 Ω   Total current: 0.00 A",
            render_load(&LoadState::new()),
        );
    }

    #[test]
    fn test_render_status() {
        let mut tracker = Tracker::new(LoadBank::reference());
        tracker.toggle(ChannelId(2)).unwrap();

        let status = render_status(&tracker, LinkState::Connected, "COM7");
        let lines = status.lines().collect::<Vec<_>>();

        assert_eq!("Relay load bank on COM7 (connected)", lines[0]);
        assert!(lines[1].starts_with("  [off] Relay 1"));
        assert!(lines[2].starts_with("  [ON ] Relay 2"));
        assert!(lines[7].contains("Relay 7 (add)"));
        assert_eq!("Total resistance: 0.480 Ω   Total current: 30.21 A", lines[11]);
    }

    #[test]
    fn test_toggle_sends_command() {
        let test_port = TestPort::new().unwrap();
        test_port.set_echo(false);
        let mut panel = test_panel(Some(&test_port));

        assert!(panel.handle_input(Input::Toggle(ChannelId(1))).unwrap());

        assert_eq!(b"toggle 1\n".to_vec(), test_port.written());
        assert_eq!(Some("toggle 1\n"), panel.link().last_sent());
        assert!(panel.tracker().state().is_on(ChannelId(1)));
        assert_eq!(
            ">> toggle 1\nTotal resistance: 0.480 Ω   Total current: 30.21 A\n",
            output(&panel),
        );
    }

    #[test]
    fn test_toggle_without_link() {
        let mut panel = test_panel(None);

        assert!(panel.handle_input(Input::Toggle(ChannelId(1))).unwrap());

        // The relay is tracked as on even though the command never left
        assert!(panel.tracker().state().is_on(ChannelId(1)));
        assert_eq!(None, panel.link().last_sent());
        assert!(output(&panel).starts_with("!! cannot send command"));
    }

    #[test]
    fn test_toggle_unknown_channel() {
        let test_port = TestPort::new().unwrap();
        let mut panel = test_panel(Some(&test_port));

        assert!(panel.handle_input(Input::Toggle(ChannelId(12))).unwrap());

        assert!(test_port.written().is_empty());
        assert_eq!("!! channel 12 does not exist\n", output(&panel));
    }

    #[test]
    fn test_manual_send_is_newline_terminated() {
        let test_port = TestPort::new().unwrap();
        test_port.set_echo(false);
        let mut panel = test_panel(Some(&test_port));

        panel.handle_input(Input::Send("status".to_string())).unwrap();

        assert_eq!(b"status\n".to_vec(), test_port.written());
        assert_eq!(">> status\n", output(&panel));
    }

    #[test]
    fn test_disconnection_shown() {
        let mut panel = test_panel(None);

        panel
            .handle_event(LinkEvent::Error(LinkError::Disconnected {
                detail: "broken pipe".to_string(),
            }))
            .unwrap();
        assert_eq!("!! device disconnected: broken pipe\n", output(&panel));

        let status = render_status(panel.tracker(), LinkState::Disconnected, "COM7");
        assert_eq!(Some("Relay load bank on COM7 (disconnected)"), status.lines().next());
    }

    #[test]
    fn test_events_and_quit() {
        let mut panel = test_panel(None);

        panel.handle_event(LinkEvent::Line("relay 4 on".to_string())).unwrap();
        panel.handle_input_error(&InputError::Empty).unwrap();

        assert!(!panel.handle_input(Input::Quit).unwrap());
        assert_eq!("<< relay 4 on\n!! nothing was entered\n", output(&panel));
    }
}
