//! Logical APDU exchange with transparent GET RESPONSE chaining
//!
//! A card that has more response data than fits in one short response answers
//! `61 XY`. The engine then issues `CLA C0 00 00 XY` until the status word is no
//! longer `61 XY`, and hands back the concatenated payload followed by the
//! final status word.

use bytes::{Bytes, BytesMut};
use tracing::{Level, debug, info, instrument, trace, warn};

use crate::error::{Error, Result};
use crate::status::{GET_RESPONSE_INS, StatusWord, split_response};

/// Minimum length of a command APDU (CLA INS P1 P2)
pub const COMMAND_HEADER_LEN: usize = 4;

/// A channel able to perform one raw APDU exchange
pub trait RawChannel {
    /// Send one raw APDU, returning a response of at least two bytes
    fn transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes>;
}

/// Transmits one logical command and returns one logical response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduExchange {
    /// Class byte for GET RESPONSE commands
    get_response_class: u8,
}

impl Default for ApduExchange {
    fn default() -> Self {
        Self::new(0x00)
    }
}

impl ApduExchange {
    /// Create an engine issuing GET RESPONSE with the given class byte
    pub const fn new(get_response_class: u8) -> Self {
        Self { get_response_class }
    }

    /// Class byte used for GET RESPONSE
    pub const fn get_response_class(&self) -> u8 {
        self.get_response_class
    }

    /// GET RESPONSE asking for `le` bytes
    pub const fn get_response_command(&self, le: u8) -> [u8; 5] {
        [self.get_response_class, GET_RESPONSE_INS, 0x00, 0x00, le]
    }

    /// Transmit `command` and return the complete response
    ///
    /// Responses that do not start a chain are returned untouched. Any raw
    /// failure aborts the exchange and drops the data gathered so far.
    #[instrument(level = "trace", skip_all, fields(command = %hex::encode(command)))]
    pub fn transmit<C>(&self, channel: &mut C, command: &[u8]) -> Result<Bytes>
    where
        C: RawChannel + ?Sized,
    {
        if command.len() < COMMAND_HEADER_LEN {
            return Err(Error::InvalidCommandLength(command.len()));
        }

        let response = channel.transmit_raw(command)?;
        let (mut status, payload) = split(&response)?;
        if !status.is_more_data_available() {
            log_status(status);
            return Ok(response);
        }

        let mut buffer = BytesMut::from(payload);
        let mut chain_count = 0usize;
        while let Some(le) = status.remaining_bytes() {
            chain_count += 1;
            trace!(remaining = le, chain_count, "Sending GET RESPONSE command");

            let next = channel.transmit_raw(&self.get_response_command(le))?;
            let (next_status, next_payload) = split(&next)?;
            buffer.extend_from_slice(next_payload);
            status = next_status;
        }

        trace!(
            total_data_len = buffer.len(),
            chain_count,
            final_sw = %status,
            "Completed response chaining"
        );
        log_status(status);
        buffer.extend_from_slice(&status.to_bytes());
        Ok(buffer.freeze())
    }
}

fn split(response: &[u8]) -> Result<(StatusWord, &[u8])> {
    split_response(response)
        .ok_or_else(|| Error::CardIo(format!("response too short: {} bytes", response.len())))
}

fn log_status(status: StatusWord) {
    let level = status.tracing_level();
    if level == Level::WARN {
        warn!(sw = %status, "{}", status.description());
    } else if level == Level::INFO {
        info!(sw = %status, "{}", status.description());
    } else {
        debug!(sw = %status, "{}", status.description());
    }
}
