//! Card lifecycle events and their delivery

mod dispatcher;
mod observer;

pub use dispatcher::EventDispatcher;
pub use observer::{ChannelObserver, ObserverId, ReaderObserver};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use derive_more::Display;

/// Sender for card events
pub type CardEventSender = Sender<CardEvent>;
/// Receiver for card events
pub type CardEventReceiver = Receiver<CardEvent>;

/// Events emitted by an observable reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// A card was inserted and its physical channel opened
    Inserted {
        /// Reader name
        reader: String,
        /// Power-on data of the inserted card
        power_on_data: Bytes,
    },
    /// The card was removed
    Removed {
        /// Reader name
        reader: String,
    },
}

/// Kind of a [`CardEvent`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CardEventKind {
    /// See [`CardEvent::Inserted`]
    #[display("CARD_INSERTED")]
    Inserted,
    /// See [`CardEvent::Removed`]
    #[display("CARD_REMOVED")]
    Removed,
}

impl CardEvent {
    /// Name of the reader that emitted the event
    pub fn reader(&self) -> &str {
        match self {
            Self::Inserted { reader, .. } | Self::Removed { reader } => reader,
        }
    }

    /// Kind of the event
    pub const fn kind(&self) -> CardEventKind {
        match self {
            Self::Inserted { .. } => CardEventKind::Inserted,
            Self::Removed { .. } => CardEventKind::Removed,
        }
    }
}
