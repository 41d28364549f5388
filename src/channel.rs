//! The relay channels of the load bank.

use std::fmt;

/// The supply voltage across the load bank, in volts.
pub const SUPPLY_VOLTAGE: f64 = 14.5;

/// The most channels a bank can have.
pub const MAX_CHANNELS: usize = 12;

/// The resistance of each relay's load in the reference bank, in ohms.
pub const REFERENCE_RESISTANCE: f64 = 0.48;

/// The number of relays in the reference bank.
pub const REFERENCE_CHANNELS: u8 = 10;

/// The relays of the reference bank from this one on are auxiliary loads.
const FIRST_AUXILIARY_CHANNEL: u8 = 7;

/// A channel number, counting from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u8);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One relay switching a fixed resistive load in or out of the bank.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    /// A short name for display.
    pub label: String,
    /// The load's resistance, in ohms.
    pub resistance: f64,
    /// The command that toggles this relay.
    pub command: String,
}

impl Channel {
    /// Returns a channel toggled with the firmware's `toggle <n>` command.
    pub fn new(id: ChannelId, label: impl Into<String>, resistance: f64) -> Self {
        Channel {
            id,
            label: label.into(),
            resistance,
            command: toggle_command(id),
        }
    }
}

/// Returns the command that toggles the relay of channel `id`.
pub fn toggle_command(id: ChannelId) -> String {
    format!("toggle {}\n", id)
}

/// Returns the channels of the reference load bank: ten relays of 0.48 Ω, the last four of which
/// switch auxiliary loads.
pub fn reference_channels() -> Vec<Channel> {
    (1..=REFERENCE_CHANNELS)
        .map(|n| {
            let label = if n >= FIRST_AUXILIARY_CHANNEL {
                format!("Relay {} (add)", n)
            } else {
                format!("Relay {}", n)
            };
            Channel::new(ChannelId(n), label, REFERENCE_RESISTANCE)
        })
        .collect()
}
