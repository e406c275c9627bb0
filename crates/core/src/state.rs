//! Reader lifecycle states

use derive_more::Display;

use crate::presence::PresenceStrategy;

/// Lifecycle state of an observable reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MonitoringState {
    /// No card; waiting for one to be detected
    #[display("WAIT_FOR_CARD_INSERTION")]
    WaitForCardInsertion,
    /// A card is present and available for APDU exchanges
    #[display("WAIT_FOR_CARD_PROCESSING")]
    WaitForCardProcessing,
    /// Processing is over; waiting for the card to leave, by the given strategy
    #[display("WAIT_FOR_CARD_REMOVAL({_0})")]
    WaitForCardRemoval(PresenceStrategy),
}

impl MonitoringState {
    /// Whether a card is considered inserted in this state
    pub const fn has_card(&self) -> bool {
        !matches!(self, Self::WaitForCardInsertion)
    }
}
