//! Configuration options for reader monitoring

use std::time::Duration;

use derive_more::Display;

/// Default pause between two insertion probes
pub const DEFAULT_INSERTION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default pause between two removal probes
pub const DEFAULT_REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether monitoring goes on after the first card leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum DetectionMode {
    /// Keep watching for new cards after a removal
    #[default]
    #[display("REPEATING")]
    Repeating,
    /// Stop once the first card has been removed
    #[display("SINGLE_SHOT")]
    SingleShot,
}

/// Configuration of a [`ReaderMonitor`](crate::ReaderMonitor)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Pause between insertion probes while no card is present
    pub insertion_poll_interval: Duration,

    /// Pause between removal probes while a card is present
    pub removal_poll_interval: Duration,

    /// Behaviour after the first removal
    pub detection_mode: DetectionMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            insertion_poll_interval: DEFAULT_INSERTION_POLL_INTERVAL,
            removal_poll_interval: DEFAULT_REMOVAL_POLL_INTERVAL,
            detection_mode: DetectionMode::Repeating,
        }
    }
}

impl MonitorConfig {
    /// Create a configuration with the default intervals
    pub fn new(detection_mode: DetectionMode) -> Self {
        Self {
            detection_mode,
            ..Self::default()
        }
    }

    /// Set the pause between insertion probes
    pub const fn with_insertion_poll_interval(mut self, interval: Duration) -> Self {
        self.insertion_poll_interval = interval;
        self
    }

    /// Set the pause between removal probes
    pub const fn with_removal_poll_interval(mut self, interval: Duration) -> Self {
        self.removal_poll_interval = interval;
        self
    }

    /// Set the detection mode
    pub const fn with_detection_mode(mut self, mode: DetectionMode) -> Self {
        self.detection_mode = mode;
        self
    }
}
