//! Error types for reader observation and APDU exchange
//!
//! [`DriverError`] is what a driver adapter reports; [`Error`] is what the
//! reader core surfaces to its callers.

/// Failure reported by a [`ReaderDriver`](crate::ReaderDriver)
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// The reader hardware or its transport could not be reached
    #[error("Reader I/O error: {0}")]
    ReaderIo(String),

    /// The card rejected the exchange or answered with malformed data
    #[error("Card I/O error: {0}")]
    CardIo(String),
}

impl DriverError {
    /// Create a reader I/O error
    pub fn reader_io<S: Into<String>>(message: S) -> Self {
        Self::ReaderIo(message.into())
    }

    /// Create a card I/O error
    pub fn card_io<S: Into<String>>(message: S) -> Self {
        Self::CardIo(message.into())
    }
}

/// Core error type surfaced by the reader
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Communication with the reader failed; lifecycle state is unchanged
    #[error("Reader I/O error: {0}")]
    ReaderIo(String),

    /// Communication with the card failed; the channel may have been closed
    #[error("Card I/O error: {0}")]
    CardIo(String),

    /// A presence poll detected the card was withdrawn while processing
    #[error("Card removed during processing")]
    CardRemovedDuringProcessing,

    /// The operation is not valid in the current state of the reader
    #[error("Contract violation: {0}")]
    ContractViolation(&'static str),

    /// Command shorter than the 4-byte header
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// The reader has been unregistered
    #[error("Reader unregistered")]
    ReaderUnregistered,

    /// A background thread could not be started
    #[error("Failed to spawn {0}")]
    Spawn(String),
}

impl Error {
    /// Create a new contract violation
    pub const fn contract(message: &'static str) -> Self {
        Self::ContractViolation(message)
    }

    /// Whether this error comes from reader or card I/O
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::ReaderIo(_) | Self::CardIo(_))
    }

    /// Whether the reader can no longer be used after this error
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ReaderUnregistered)
    }
}

impl From<DriverError> for Error {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::ReaderIo(message) => Self::ReaderIo(message),
            DriverError::CardIo(message) => Self::CardIo(message),
        }
    }
}

/// Result type for reader operations
pub type Result<T> = core::result::Result<T, Error>;
