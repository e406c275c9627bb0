//! Physical channel management for one reader

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::driver::ReaderDriver;
use crate::error::{Error, Result};
use crate::exchange::RawChannel;

/// Owns the driver of one reader together with its physical channel,
/// power-on data and protocol registration
pub struct ChannelController {
    /// Driver adapter
    driver: Box<dyn ReaderDriver>,
    /// Reader name, captured once at construction
    name: Arc<str>,
    /// Power-on data captured at the last successful open
    power_on_data: Option<Bytes>,
    /// Protocol id to activation state
    protocols: HashMap<String, bool>,
    /// Set once the reader is unregistered
    released: Arc<AtomicBool>,
    /// Whether the driver unregister hook already ran
    driver_released: bool,
}

impl fmt::Debug for ChannelController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelController")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field(
                "power_on_data",
                &self.power_on_data.as_ref().map(hex::encode_upper),
            )
            .field("protocols", &self.protocols)
            .field("released", &self.is_released())
            .finish()
    }
}

impl ChannelController {
    /// Take ownership of a driver
    ///
    /// Fails with a contract violation if the driver reports an empty name.
    pub fn new<D: ReaderDriver + 'static>(driver: D) -> Result<Self> {
        if driver.name().is_empty() {
            return Err(Error::contract("reader name must not be empty"));
        }
        let name = Arc::from(driver.name());
        Ok(Self {
            driver: Box::new(driver),
            name,
            power_on_data: None,
            protocols: HashMap::new(),
            released: Arc::new(AtomicBool::new(false)),
            driver_released: false,
        })
    }

    /// Name of the reader
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle on the name, for event tagging
    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Flag that, once set, makes every I/O primitive fail with
    /// [`Error::ReaderUnregistered`]
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    /// Whether the controller has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_released() {
            Err(Error::ReaderUnregistered)
        } else {
            Ok(())
        }
    }

    /// Open the physical channel and capture the power-on data
    pub fn open(&mut self) -> Result<()> {
        self.ensure_active()?;
        debug!(reader = %self.name, "Opening physical channel");
        self.driver.open_physical_channel()?;

        let power_on_data = self.driver.power_on_data();
        if power_on_data.is_empty() {
            if let Err(e) = self.driver.close_physical_channel() {
                warn!(reader = %self.name, error = %e, "Failed to close channel after empty power-on data");
            }
            return Err(Error::CardIo("card returned empty power-on data".into()));
        }

        trace!(reader = %self.name, power_on_data = %hex::encode_upper(&power_on_data), "Physical channel open");
        self.power_on_data = Some(power_on_data);
        Ok(())
    }

    /// Close the physical channel, doing nothing if it is already closed
    pub fn close(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.close_channel()
    }

    fn close_channel(&mut self) -> Result<()> {
        // Power-on data does not outlive the channel, whatever the driver says.
        self.power_on_data = None;
        if !self.driver.is_physical_channel_open() {
            trace!(reader = %self.name, "Physical channel already closed");
            return Ok(());
        }
        debug!(reader = %self.name, "Closing physical channel");
        self.driver.close_physical_channel().map_err(Into::into)
    }

    /// Whether the physical channel is open, as reported by the driver
    pub fn is_open(&self) -> bool {
        self.driver.is_physical_channel_open()
    }

    /// Probe the reader for a card
    pub fn check_presence(&mut self) -> Result<bool> {
        self.ensure_active()?;
        let present = self.driver.check_card_presence()?;
        trace!(reader = %self.name, present, "Card presence probed");
        Ok(present)
    }

    /// Power-on data of the card, only while the channel is open
    pub fn power_on_data(&self) -> Option<&Bytes> {
        if self.is_open() {
            self.power_on_data.as_ref()
        } else {
            None
        }
    }

    /// Whether this is a contactless reader
    pub fn is_contactless(&self) -> bool {
        self.driver.is_contactless()
    }

    /// Whether the reader supports the protocol
    pub fn is_protocol_supported(&self, protocol: &str) -> bool {
        self.driver.is_protocol_supported(protocol)
    }

    /// Activate a protocol
    ///
    /// Callers must check [`is_protocol_supported`](Self::is_protocol_supported)
    /// first; an unsupported protocol is a contract violation.
    pub fn activate_protocol(&mut self, protocol: &str) -> Result<()> {
        self.ensure_active()?;
        if !self.driver.is_protocol_supported(protocol) {
            return Err(Error::contract("protocol not supported by the reader"));
        }
        self.driver.activate_protocol(protocol);
        self.protocols.insert(protocol.to_string(), true);
        debug!(reader = %self.name, protocol, "Protocol activated");
        Ok(())
    }

    /// Deactivate a protocol
    pub fn deactivate_protocol(&mut self, protocol: &str) -> Result<()> {
        self.ensure_active()?;
        if let Some(active) = self.protocols.get_mut(protocol) {
            *active = false;
            self.driver.deactivate_protocol(protocol);
            debug!(reader = %self.name, protocol, "Protocol deactivated");
        }
        Ok(())
    }

    /// Whether the protocol is active and used by the current card
    pub fn is_current_protocol(&self, protocol: &str) -> bool {
        self.is_protocol_active(protocol) && self.driver.is_current_protocol(protocol)
    }

    /// Whether the protocol has been activated
    pub fn is_protocol_active(&self, protocol: &str) -> bool {
        self.protocols.get(protocol).copied().unwrap_or(false)
    }

    /// Best-effort shutdown: close the channel and let the driver unregister
    ///
    /// Errors are logged, never returned. Calling it twice is harmless.
    pub fn release(&mut self) {
        self.released.store(true, Ordering::Release);
        if self.driver_released {
            return;
        }
        self.driver_released = true;
        if let Err(e) = self.close_channel() {
            warn!(reader = %self.name, error = %e, "Failed to close physical channel on release");
        }
        self.driver.unregister();
        debug!(reader = %self.name, "Channel controller released");
    }
}

impl Drop for ChannelController {
    fn drop(&mut self) {
        if self.driver_released || !self.driver.is_physical_channel_open() {
            return;
        }
        if let Err(e) = self.driver.close_physical_channel() {
            warn!(reader = %self.name, error = %e, "Failed to close physical channel on drop");
        }
    }
}

impl RawChannel for ChannelController {
    fn transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes> {
        self.ensure_active()?;
        let response = self.driver.transmit_raw(apdu)?;
        if response.len() < 2 {
            return Err(Error::CardIo(format!(
                "response too short: {} bytes",
                response.len()
            )));
        }
        Ok(response)
    }
}
