//! Tracking of which relays are on and the load they put on the supply.
//!
//! The state is a plain value: [`toggle`] computes the next state from the previous one without
//! touching the link or the display, and the equivalent resistance is always recomputed from the
//! set of channels that are on, so no rounding error accumulates across toggles.

use thiserror::Error;

use std::collections::{BTreeSet, HashSet};

use crate::channel::{reference_channels, Channel, ChannelId, MAX_CHANNELS, SUPPLY_VOLTAGE};

/// Resistances at or below this many ohms are treated as no load at all.
pub const RESISTANCE_EPSILON: f64 = 0.01;

/// Errors from configuring or toggling the load bank.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("channel {0} does not exist")]
    UnknownChannel(ChannelId),
    #[error("a load bank has at most {max} channels, got {count}")]
    TooManyChannels { count: usize, max: usize },
    #[error("channel {0} is configured more than once")]
    DuplicateChannel(ChannelId),
    #[error("channel numbers start at 1")]
    InvalidChannelId,
    #[error("channel {id} has an invalid resistance of {resistance} ohms")]
    InvalidResistance { id: ChannelId, resistance: f64 },
}

/// The fixed set of channels in a load bank.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadBank {
    channels: Vec<Channel>,
}

impl LoadBank {
    /// Returns a `LoadBank` with `channels`, checking that there are not too many of them, that
    /// their ids are unique and non-zero and that every resistance is a positive number of ohms.
    pub fn new(channels: Vec<Channel>) -> Result<Self, TrackerError> {
        if channels.len() > MAX_CHANNELS {
            return Err(TrackerError::TooManyChannels {
                count: channels.len(),
                max: MAX_CHANNELS,
            });
        }

        let mut seen = HashSet::new();
        for channel in &channels {
            if channel.id.0 == 0 {
                return Err(TrackerError::InvalidChannelId);
            }
            if !seen.insert(channel.id) {
                return Err(TrackerError::DuplicateChannel(channel.id));
            }
            if !channel.resistance.is_finite() || channel.resistance <= 0.0 {
                return Err(TrackerError::InvalidResistance {
                    id: channel.id,
                    resistance: channel.resistance,
                });
            }
        }

        Ok(LoadBank { channels })
    }

    /// Returns the reference load bank. See [`reference_channels`].
    pub fn reference() -> Self {
        LoadBank {
            channels: reference_channels(),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// Which channels are on, and the resulting equivalent resistance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadState {
    on: BTreeSet<ChannelId>,
    /// In ohms. Zero means no load.
    equivalent_resistance: f64,
}

impl LoadState {
    /// Returns the state with every channel off.
    pub fn new() -> Self {
        LoadState::default()
    }

    pub fn is_on(&self, id: ChannelId) -> bool {
        self.on.contains(&id)
    }

    /// Returns the channels that are on, in ascending order.
    pub fn on_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.on.iter().copied()
    }

    /// Returns the resistance of all the channels that are on combined in parallel, in ohms, or
    /// zero if none are on.
    pub fn equivalent_resistance(&self) -> f64 {
        self.equivalent_resistance
    }

    /// Returns the current drawn from the supply, in amperes.
    pub fn current_amps(&self) -> f64 {
        if self.equivalent_resistance != 0.0 {
            SUPPLY_VOLTAGE / self.equivalent_resistance
        } else {
            0.0
        }
    }
}

/// Returns the state after toggling channel `id` of `bank` in `state`.
pub fn toggle(bank: &LoadBank, state: &LoadState, id: ChannelId) -> Result<LoadState, TrackerError> {
    if bank.channel(id).is_none() {
        return Err(TrackerError::UnknownChannel(id));
    }

    let mut on = state.on.clone();
    if !on.remove(&id) {
        on.insert(id);
    }

    let equivalent_resistance = parallel_resistance(
        on.iter().filter_map(|id| bank.channel(*id)).map(|c| c.resistance),
    );

    Ok(LoadState {
        on,
        equivalent_resistance,
    })
}

/// Returns the resistance of `resistances` combined in parallel, or zero if there are none.
/// Results at or below [`RESISTANCE_EPSILON`] are rounded to zero.
pub fn parallel_resistance(resistances: impl IntoIterator<Item = f64>) -> f64 {
    let conductance: f64 = resistances.into_iter().map(|r| 1.0 / r).sum();

    if conductance == 0.0 {
        return 0.0;
    }

    let resistance = 1.0 / conductance;
    if resistance <= RESISTANCE_EPSILON {
        0.0
    } else {
        resistance
    }
}

/// A load bank together with its current state.
#[derive(Clone, Debug)]
pub struct Tracker {
    bank: LoadBank,
    state: LoadState,
}

impl Tracker {
    /// Returns a `Tracker` for `bank` with every channel off.
    pub fn new(bank: LoadBank) -> Self {
        Tracker {
            bank,
            state: LoadState::new(),
        }
    }

    /// Toggles channel `id` and returns it, so that its command can be sent.
    pub fn toggle(&mut self, id: ChannelId) -> Result<&Channel, TrackerError> {
        self.state = toggle(&self.bank, &self.state, id)?;
        self.bank.channel(id).ok_or(TrackerError::UnknownChannel(id))
    }

    pub fn bank(&self) -> &LoadBank {
        &self.bank
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }
}
