//! Driver adapter contract
//!
//! A [`ReaderDriver`] binds one physical reader (PC/SC, USB, serial, ...) to the
//! reader core. Every operation is synchronous and may block on hardware I/O.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::DriverError;

/// Capability set a hardware driver must provide for one reader
///
/// Implementations report failures as [`DriverError::ReaderIo`] when the
/// reader cannot be reached and [`DriverError::CardIo`] when the card fails.
pub trait ReaderDriver: Send + fmt::Debug {
    /// Name of the reader, never empty
    fn name(&self) -> &str;

    /// Whether the reader knows the given protocol
    fn is_protocol_supported(&self, protocol: &str) -> bool;

    /// Enable a supported protocol
    fn activate_protocol(&mut self, protocol: &str);

    /// Disable a protocol so cards using it are ignored
    fn deactivate_protocol(&mut self, protocol: &str);

    /// Whether the card in the field communicates with the given protocol
    fn is_current_protocol(&self, protocol: &str) -> bool;

    /// Establish the physical channel with the card
    fn open_physical_channel(&mut self) -> Result<(), DriverError>;

    /// Release the physical channel
    ///
    /// The channel may already have been closed by a card withdrawal.
    fn close_physical_channel(&mut self) -> Result<(), DriverError>;

    /// Whether the physical channel is currently open
    fn is_physical_channel_open(&self) -> bool;

    /// Probe the reader for a card
    fn check_card_presence(&mut self) -> Result<bool, DriverError>;

    /// Power-on data (ATR or reader-defined equivalent) of the current card
    fn power_on_data(&self) -> Bytes;

    /// Send one raw APDU and return the raw response
    ///
    /// No GET RESPONSE handling happens at this level.
    fn transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes, DriverError> {
        trace!(command = %hex::encode(apdu), "Transmitting raw APDU");
        let result = self.do_transmit_raw(apdu);
        match &result {
            Ok(response) => trace!(response = %hex::encode(response), "Received raw response"),
            Err(e) => debug!(error = %e, "Driver error during transmission"),
        }
        result
    }

    /// Driver-specific implementation of [`transmit_raw`](Self::transmit_raw)
    fn do_transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes, DriverError>;

    /// Whether this is a contactless reader
    fn is_contactless(&self) -> bool;

    /// Invoked once when the reader is unregistered
    fn unregister(&mut self) {}
}

impl<D: ReaderDriver + ?Sized> ReaderDriver for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_protocol_supported(&self, protocol: &str) -> bool {
        (**self).is_protocol_supported(protocol)
    }

    fn activate_protocol(&mut self, protocol: &str) {
        (**self).activate_protocol(protocol)
    }

    fn deactivate_protocol(&mut self, protocol: &str) {
        (**self).deactivate_protocol(protocol)
    }

    fn is_current_protocol(&self, protocol: &str) -> bool {
        (**self).is_current_protocol(protocol)
    }

    fn open_physical_channel(&mut self) -> Result<(), DriverError> {
        (**self).open_physical_channel()
    }

    fn close_physical_channel(&mut self) -> Result<(), DriverError> {
        (**self).close_physical_channel()
    }

    fn is_physical_channel_open(&self) -> bool {
        (**self).is_physical_channel_open()
    }

    fn check_card_presence(&mut self) -> Result<bool, DriverError> {
        (**self).check_card_presence()
    }

    fn power_on_data(&self) -> Bytes {
        (**self).power_on_data()
    }

    fn transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes, DriverError> {
        (**self).transmit_raw(apdu)
    }

    fn do_transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes, DriverError> {
        (**self).do_transmit_raw(apdu)
    }

    fn is_contactless(&self) -> bool {
        (**self).is_contactless()
    }

    fn unregister(&mut self) {
        (**self).unregister()
    }
}

#[cfg(test)]
pub(crate) use mock::MockDriver;
