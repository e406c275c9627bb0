//! Observer side of event delivery

use derive_more::Display;

use super::{CardEvent, CardEventSender};

/// Receives the lifecycle events of a reader
///
/// Called from the dispatcher thread, never from the thread that drove the
/// transition.
pub trait ReaderObserver: Send + Sync {
    /// Handle one event
    fn on_reader_event(&self, event: &CardEvent);
}

impl<F> ReaderObserver for F
where
    F: Fn(&CardEvent) + Send + Sync,
{
    fn on_reader_event(&self, event: &CardEvent) {
        self(event)
    }
}

/// Observer forwarding every event into a channel
#[derive(Debug, Clone)]
pub struct ChannelObserver(pub CardEventSender);

impl ReaderObserver for ChannelObserver {
    fn on_reader_event(&self, event: &CardEvent) {
        // A dropped receiver only means nobody listens any more.
        let _ = self.0.send(event.clone());
    }
}

/// Handle returned when registering an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("observer#{_0}")]
pub struct ObserverId(pub(crate) u64);
