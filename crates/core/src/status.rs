//! Status words and response splitting

use std::fmt;

use tracing::Level;

/// GET RESPONSE instruction byte
pub const GET_RESPONSE_INS: u8 = 0xC0;

/// Status Word (SW1-SW2) trailing every APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Success (90 00)
    pub const SUCCESS: Self = Self::new(0x90, 0x00);

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Returns the bytes in wire order
    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if the card has more response data waiting (61 XY)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Number of bytes the card announced with `61 XY`
    ///
    /// `XY` is passed verbatim as Le of the GET RESPONSE, so `00` stands for 256.
    pub const fn remaining_bytes(&self) -> Option<u8> {
        if self.is_more_data_available() {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Check if this status word is a warning (62 XX / 63 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62 || self.sw1 == 0x63
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() || self.is_more_data_available() {
            Level::DEBUG
        } else if self.is_warning() {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Short description of the most common ISO 7816-4 status words
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, _) => "Warning, state of non-volatile memory unchanged",
            (0x63, _) => "Warning, state of non-volatile memory changed",
            (0x64, _) => "Execution error, state of non-volatile memory unchanged",
            (0x65, _) => "Execution error, state of non-volatile memory changed",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x83) => "Record not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Split a raw response into its status word and payload
///
/// Returns `None` when the data is too short to carry a status word.
pub fn split_response(data: &[u8]) -> Option<(StatusWord, &[u8])> {
    match data {
        [payload @ .., sw1, sw2] => Some((StatusWord::new(*sw1, *sw2), payload)),
        _ => None,
    }
}
