//! Error types for reader monitoring

/// Errors raised when starting or running a monitor
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The reader was unregistered before monitoring could start
    #[error("Reader {0} is unregistered")]
    Unregistered(String),

    /// The monitoring thread could not be started
    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
