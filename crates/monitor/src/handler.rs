//! Handling of errors raised while observing a reader

use apdu_reader_core::Error;
use tracing::warn;

/// Receives the failures the monitoring thread runs into
///
/// The monitor keeps running after reporting; only an unregistered reader
/// stops it.
pub trait ObservationErrorHandler: Send + Sync {
    /// Handle one failure on the named reader
    fn on_observation_error(&self, reader: &str, error: &Error);
}

impl<F> ObservationErrorHandler for F
where
    F: Fn(&str, &Error) + Send + Sync,
{
    fn on_observation_error(&self, reader: &str, error: &Error) {
        self(reader, error)
    }
}

/// Handler that logs every failure at `warn` level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl ObservationErrorHandler for LoggingErrorHandler {
    fn on_observation_error(&self, reader: &str, error: &Error) {
        warn!(reader, %error, "Reader observation failed");
    }
}
