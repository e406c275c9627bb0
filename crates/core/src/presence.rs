//! Card removal detection strategies

use derive_more::Display;
use tracing::{trace, warn};

use crate::channel::ChannelController;
use crate::error::{Error, Result};

/// Outcome of one presence poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CardPresence {
    /// The card is still in the field
    #[display("STILL_PRESENT")]
    StillPresent,
    /// The card is gone
    #[display("REMOVED")]
    Removed,
}

impl CardPresence {
    /// Map a presence probe result
    pub const fn from_probe(present: bool) -> Self {
        if present {
            Self::StillPresent
        } else {
            Self::Removed
        }
    }
}

/// How the reader learns that the card was withdrawn
///
/// Selected once per reader; the lifecycle state machine asks the strategy
/// what to do instead of carrying one state machine per hardware family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PresenceStrategy {
    /// The driver pushes a removal notification on its own
    #[display("AUTONOMOUS")]
    Autonomous,
    /// Presence is polled between APDU exchanges while processing
    #[display("POLLED_DURING_PROCESSING")]
    PolledDuringProcessing,
    /// Presence is polled once processing has been declared finished
    #[display("POLLED_AFTER_PROCESSING")]
    PolledAfterProcessing,
}

impl PresenceStrategy {
    /// Whether removal arrives through the autonomous notification sink
    pub const fn supports_autonomous_notification(&self) -> bool {
        matches!(self, Self::Autonomous)
    }

    /// Whether presence is polled around every exchange while processing
    pub const fn polls_during_processing(&self) -> bool {
        matches!(self, Self::PolledDuringProcessing)
    }

    /// Whether removal is detected by polling at all
    pub const fn is_polled(&self) -> bool {
        !self.supports_autonomous_notification()
    }

    /// Probe the reader once
    ///
    /// Not applicable to [`Autonomous`](Self::Autonomous), where it is a
    /// contract violation.
    pub fn poll_once(&self, channel: &mut ChannelController) -> Result<CardPresence> {
        if self.supports_autonomous_notification() {
            return Err(Error::contract(
                "autonomous removal detection cannot be polled",
            ));
        }
        let presence = CardPresence::from_probe(channel.check_presence()?);
        trace!(reader = channel.name(), strategy = %self, %presence, "Presence polled");
        Ok(presence)
    }

    /// Run the strategy's work when processing is declared finished
    ///
    /// Only [`PolledAfterProcessing`](Self::PolledAfterProcessing) does
    /// anything: it closes the channel if still open, then polls once. The
    /// other strategies keep waiting and report the card as still present.
    pub fn on_enter_removal_wait(&self, channel: &mut ChannelController) -> Result<CardPresence> {
        match self {
            Self::Autonomous | Self::PolledDuringProcessing => Ok(CardPresence::StillPresent),
            Self::PolledAfterProcessing => {
                if channel.is_open() {
                    if let Err(e) = channel.close() {
                        if e.is_terminal() {
                            return Err(e);
                        }
                        warn!(reader = channel.name(), error = %e, "Failed to close channel after processing");
                    }
                }
                self.poll_once(channel)
            }
        }
    }
}
