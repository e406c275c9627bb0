//! Observable smart card readers
//!
//! This crate turns a hardware reader driver into an observable reader: it
//! tracks the card lifecycle, tells observers when a card is inserted or
//! removed, and exchanges APDUs with the card while hiding the ISO/IEC 7816-4
//! GET RESPONSE chaining.
//!
//! ## Overview
//!
//! - [`ReaderDriver`] is what a hardware binding implements
//! - [`ObservableReader`] drives the lifecycle of one reader
//! - [`PresenceStrategy`] selects how card removal is detected
//! - [`ReaderObserver`] receives [`CardEvent`]s, in order, off the caller's thread
//!
//! ```ignore
//! let reader = ObservableReader::new(driver, ReaderConfig::new(PresenceStrategy::PolledAfterProcessing))?;
//! let events = reader.subscribe();
//!
//! if reader.detect_insertion()? {
//!     let response = reader.transmit(&[0x00, 0xA4, 0x04, 0x00])?;
//!     reader.finalize_card_processing()?;
//! }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod channel;
pub mod config;
pub mod driver;
pub mod event;
pub mod exchange;
pub mod presence;
pub mod reader;
pub mod state;
pub mod status;

mod error;
pub use error::{DriverError, Error, Result};

pub use channel::ChannelController;
pub use config::{InsertionMode, ReaderConfig};
pub use driver::ReaderDriver;
pub use event::{
    CardEvent, CardEventKind, CardEventReceiver, CardEventSender, ChannelObserver, EventDispatcher,
    ObserverId, ReaderObserver,
};
pub use exchange::{ApduExchange, RawChannel};
pub use presence::{CardPresence, PresenceStrategy};
pub use reader::{CardInsertionNotifier, CardRemovalNotifier, ObservableReader};
pub use state::MonitoringState;
pub use status::StatusWord;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, CardEvent, CardEventKind, DriverError, Error, InsertionMode, MonitoringState,
        ObservableReader, PresenceStrategy, ReaderConfig, ReaderDriver, ReaderObserver, Result,
        StatusWord,
    };
}
