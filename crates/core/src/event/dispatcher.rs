//! Ordered, off-thread delivery of card events

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use super::observer::{ChannelObserver, ObserverId, ReaderObserver};
use super::{CardEvent, CardEventReceiver};
use crate::error::{Error, Result};

type Observers = Arc<RwLock<Vec<(ObserverId, Arc<dyn ReaderObserver>)>>>;

enum Message {
    Event(CardEvent),
    Flush(Sender<()>),
}

/// Delivers the events of one reader to its observers
///
/// Events are queued in publication order and delivered one at a time by a
/// dedicated thread, so observers never run under the reader's lock.
pub struct EventDispatcher {
    /// Queue into the delivery thread, `None` once shut down
    sender: Mutex<Option<Sender<Message>>>,
    /// Registered observers
    observers: Observers,
    /// Next observer id
    next_id: AtomicU64,
    /// Delivery thread
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Id of the delivery thread
    worker_id: ThreadId,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.count_observers())
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

impl EventDispatcher {
    /// Start a dispatcher for the named reader
    pub fn new(reader: &str) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let observers: Observers = Arc::default();

        let worker = thread::Builder::new()
            .name(format!("card-events-{reader}"))
            .spawn({
                let observers = Arc::clone(&observers);
                move || deliver(&receiver, &observers)
            })
            .map_err(|e| Error::Spawn(format!("event dispatcher thread: {e}")))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            observers,
            next_id: AtomicU64::new(0),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Register an observer
    pub fn add_observer<O>(&self, observer: O) -> ObserverId
    where
        O: ReaderObserver + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let observer: Arc<dyn ReaderObserver> = Arc::new(observer);
        self.observers.write().push((id, observer));
        debug!(%id, "Observer added");
        id
    }

    /// Register a channel observer and return its receiving end
    pub fn subscribe(&self) -> CardEventReceiver {
        let (sender, receiver) = unbounded();
        self.add_observer(ChannelObserver(sender));
        receiver
    }

    /// Remove an observer, returning whether it was registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        before != observers.len()
    }

    /// Remove every observer
    pub fn clear_observers(&self) {
        self.observers.write().clear();
    }

    /// Number of registered observers
    pub fn count_observers(&self) -> usize {
        self.observers.read().len()
    }

    /// Queue an event for delivery
    ///
    /// Events published after [`shutdown`](Self::shutdown) are dropped.
    pub fn publish(&self, event: CardEvent) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                trace!(kind = %event.kind(), reader = event.reader(), "Publishing event");
                let _ = sender.send(Message::Event(event));
            }
            None => debug!(kind = %event.kind(), "Dispatcher shut down, event dropped"),
        }
    }

    /// Block until every event published so far has been delivered
    ///
    /// Returns immediately when called from an observer.
    pub fn flush(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let (ack, done) = bounded(1);
        let queued = self
            .sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(Message::Flush(ack)).is_ok());
        if queued {
            let _ = done.recv();
        }
    }

    /// Deliver pending events, then stop the delivery thread
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Event dispatcher thread panicked");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver(receiver: &Receiver<Message>, observers: &Observers) {
    for message in receiver.iter() {
        match message {
            Message::Event(event) => {
                let snapshot: Vec<_> = observers
                    .read()
                    .iter()
                    .map(|(id, observer)| (*id, Arc::clone(observer)))
                    .collect();
                for (id, observer) in snapshot {
                    let delivered =
                        catch_unwind(AssertUnwindSafe(|| observer.on_reader_event(&event)));
                    if delivered.is_err() {
                        error!(%id, kind = %event.kind(), "Observer panicked while handling event");
                    }
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    trace!("Event dispatcher stopped");
}
