//! Configuration options for an observable reader

use derive_more::Display;

use crate::presence::PresenceStrategy;

/// How card insertion reaches the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum InsertionMode {
    /// Insertion is detected by probing presence
    #[display("POLLED")]
    Polled,
    /// The driver pushes insertion through a [`CardInsertionNotifier`](crate::CardInsertionNotifier)
    #[display("AUTONOMOUS")]
    Autonomous,
}

/// Configuration of an observable reader, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Card removal detection strategy
    pub presence_strategy: PresenceStrategy,

    /// Card insertion detection mode
    pub insertion_mode: InsertionMode,

    /// Class byte of the GET RESPONSE commands issued while chaining
    pub get_response_class: u8,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            presence_strategy: PresenceStrategy::PolledDuringProcessing,
            insertion_mode: InsertionMode::Polled,
            get_response_class: 0x00,
        }
    }
}

impl ReaderConfig {
    /// Create a configuration for the given removal strategy
    pub fn new(presence_strategy: PresenceStrategy) -> Self {
        Self {
            presence_strategy,
            ..Self::default()
        }
    }

    /// Set the removal detection strategy
    pub const fn with_presence_strategy(mut self, strategy: PresenceStrategy) -> Self {
        self.presence_strategy = strategy;
        self
    }

    /// Set the insertion detection mode
    pub const fn with_insertion_mode(mut self, mode: InsertionMode) -> Self {
        self.insertion_mode = mode;
        self
    }

    /// Set the GET RESPONSE class byte
    pub const fn with_get_response_class(mut self, class: u8) -> Self {
        self.get_response_class = class;
        self
    }
}
