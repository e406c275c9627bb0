//! Observable reader: the card lifecycle state machine
//!
//! Every state mutation happens under one lock per reader. Notifications coming
//! from driver threads are posted to a mailbox and applied by whichever thread
//! next holds the lock, so a removal callback racing with a poll can never
//! leave the machine half-transitioned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::channel::ChannelController;
use crate::config::{InsertionMode, ReaderConfig};
use crate::driver::ReaderDriver;
use crate::error::{Error, Result};
use crate::event::{CardEvent, CardEventReceiver, EventDispatcher, ObserverId, ReaderObserver};
use crate::exchange::ApduExchange;
use crate::presence::{CardPresence, PresenceStrategy};
use crate::state::MonitoringState;

/// Notification posted by a driver thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stimulus {
    CardInserted,
    CardRemoved,
}

#[derive(Debug)]
struct Inner {
    state: MonitoringState,
    channel: ChannelController,
}

#[derive(Debug)]
struct Shared {
    name: Arc<str>,
    config: ReaderConfig,
    exchange: ApduExchange,
    contactless: bool,
    /// Shared with the channel controller
    released: Arc<AtomicBool>,
    inner: Mutex<Inner>,
    mailbox: (Sender<Stimulus>, Receiver<Stimulus>),
    dispatcher: EventDispatcher,
}

/// A reader whose card lifecycle can be observed
///
/// Cloning yields another handle on the same reader.
#[derive(Debug, Clone)]
pub struct ObservableReader {
    shared: Arc<Shared>,
}

impl ObservableReader {
    /// Wrap a driver
    pub fn new<D: ReaderDriver + 'static>(driver: D, config: ReaderConfig) -> Result<Self> {
        let contactless = driver.is_contactless();
        let channel = ChannelController::new(driver)?;
        let name = channel.shared_name();
        let dispatcher = EventDispatcher::new(&name)?;

        debug!(
            reader = %name,
            strategy = %config.presence_strategy,
            insertion = %config.insertion_mode,
            contactless,
            "Observable reader created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                released: channel.release_flag(),
                exchange: ApduExchange::new(config.get_response_class),
                name,
                config,
                contactless,
                inner: Mutex::new(Inner {
                    state: MonitoringState::WaitForCardInsertion,
                    channel,
                }),
                mailbox: unbounded(),
                dispatcher,
            }),
        })
    }

    /// Name of the reader
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether this is a contactless reader
    pub fn is_contactless(&self) -> bool {
        self.shared.contactless
    }

    /// Configuration the reader was built with
    pub fn config(&self) -> &ReaderConfig {
        &self.shared.config
    }

    /// Removal detection strategy
    pub fn strategy(&self) -> PresenceStrategy {
        self.shared.config.presence_strategy
    }

    /// Whether [`unregister`](Self::unregister) has been called
    pub fn is_unregistered(&self) -> bool {
        self.shared.is_released()
    }

    /// Current lifecycle state, with pending notifications applied
    pub fn state(&self) -> MonitoringState {
        let state = {
            let mut inner = self.shared.inner.lock();
            self.shared.drain(&mut inner);
            inner.state
        };
        self.shared.pump();
        state
    }

    /// Register an observer of card events
    ///
    /// An observer holding a clone of this reader keeps it alive: such readers
    /// must be released with [`unregister`](Self::unregister), which drops
    /// every observer.
    pub fn add_observer<O>(&self, observer: O) -> ObserverId
    where
        O: ReaderObserver + 'static,
    {
        self.shared.dispatcher.add_observer(observer)
    }

    /// Register a channel observer and return its receiving end
    pub fn subscribe(&self) -> CardEventReceiver {
        self.shared.dispatcher.subscribe()
    }

    /// Remove an observer
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.dispatcher.remove_observer(id)
    }

    /// Remove every observer
    pub fn clear_observers(&self) {
        self.shared.dispatcher.clear_observers()
    }

    /// Number of registered observers
    pub fn count_observers(&self) -> usize {
        self.shared.dispatcher.count_observers()
    }

    /// Wait until every event emitted so far has reached the observers
    pub fn flush_events(&self) {
        self.shared.dispatcher.flush()
    }

    /// Sink for drivers that push card removal
    ///
    /// Only available with [`PresenceStrategy::Autonomous`].
    pub fn removal_notifier(&self) -> Result<CardRemovalNotifier> {
        if !self.strategy().supports_autonomous_notification() {
            return Err(Error::contract(
                "removal notifications require the autonomous strategy",
            ));
        }
        Ok(CardRemovalNotifier {
            reader: Arc::downgrade(&self.shared),
        })
    }

    /// Sink for drivers that push card insertion
    ///
    /// Only available with [`InsertionMode::Autonomous`].
    pub fn insertion_notifier(&self) -> Result<CardInsertionNotifier> {
        if self.shared.config.insertion_mode != InsertionMode::Autonomous {
            return Err(Error::contract(
                "insertion notifications require autonomous insertion",
            ));
        }
        Ok(CardInsertionNotifier {
            reader: Arc::downgrade(&self.shared),
        })
    }

    /// Probe for a card and, if one is found while waiting for insertion,
    /// open its channel and emit [`CardEvent::Inserted`]
    ///
    /// Returns whether a card was inserted by this call.
    pub fn detect_insertion(&self) -> Result<bool> {
        self.locked(|shared, inner| {
            if inner.state != MonitoringState::WaitForCardInsertion {
                return Ok(false);
            }
            if !inner.channel.check_presence()? {
                return Ok(false);
            }
            shared.insert(inner)?;
            Ok(true)
        })
    }

    /// Probe the reader for a card, without changing state
    pub fn is_card_present(&self) -> Result<bool> {
        self.locked(|_, inner| inner.channel.check_presence())
    }

    /// Power-on data of the current card
    pub fn power_on_data(&self) -> Result<Bytes> {
        self.locked(|_, inner| match inner.channel.power_on_data() {
            Some(power_on_data) => Ok(power_on_data.clone()),
            None => Err(Error::contract(
                "power-on data is only available while the channel is open",
            )),
        })
    }

    /// Exchange one logical APDU with the card
    ///
    /// Only valid while processing. With
    /// [`PresenceStrategy::PolledDuringProcessing`] presence is polled before
    /// and after the exchange; a removal fails the call with
    /// [`Error::CardRemovedDuringProcessing`] and returns the reader to
    /// [`MonitoringState::WaitForCardInsertion`].
    #[instrument(level = "debug", skip_all, fields(reader = %self.shared.name))]
    pub fn transmit(&self, command: &[u8]) -> Result<Bytes> {
        self.locked(|shared, inner| shared.transmit(inner, command))
    }

    /// Signal that the application is done with the card
    pub fn finalize_card_processing(&self) -> Result<()> {
        self.locked(|shared, inner| shared.finalize(inner))
    }

    /// Poll for removal once, according to the presence strategy
    ///
    /// Returns whether the removal was confirmed by this call. Waiting for
    /// insertion, this is a no-op returning `false`.
    pub fn check_removal(&self) -> Result<bool> {
        self.locked(|shared, inner| shared.check_removal(inner))
    }

    /// Whether the protocol is supported by the reader
    pub fn is_protocol_supported(&self, protocol: &str) -> Result<bool> {
        self.locked(|_, inner| Ok(inner.channel.is_protocol_supported(protocol)))
    }

    /// Activate a supported protocol
    pub fn activate_protocol(&self, protocol: &str) -> Result<()> {
        self.locked(|_, inner| inner.channel.activate_protocol(protocol))
    }

    /// Deactivate a protocol
    pub fn deactivate_protocol(&self, protocol: &str) -> Result<()> {
        self.locked(|_, inner| inner.channel.deactivate_protocol(protocol))
    }

    /// Whether the current card uses the given active protocol
    pub fn is_current_protocol(&self, protocol: &str) -> Result<bool> {
        self.locked(|_, inner| Ok(inner.channel.is_current_protocol(protocol)))
    }

    /// Release the reader for good
    ///
    /// Operations in flight on other threads fail with
    /// [`Error::ReaderUnregistered`]. The channel is closed best-effort, events
    /// already emitted are still delivered, then the observers are dropped.
    pub fn unregister(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            inner.channel.release();
            let discarded = self.shared.mailbox.1.try_iter().count();
            if discarded > 0 {
                debug!(reader = %self.shared.name, discarded, "Pending notifications discarded");
            }
        }
        self.shared.dispatcher.shutdown();
        self.shared.dispatcher.clear_observers();
        info!(reader = %self.shared.name, "Reader unregistered");
    }

    fn locked<T>(&self, f: impl FnOnce(&Shared, &mut Inner) -> Result<T>) -> Result<T> {
        let shared = &*self.shared;
        shared.ensure_registered()?;
        let result = {
            let mut inner = shared.inner.lock();
            shared.drain(&mut inner);
            let result = f(shared, &mut inner);
            // Work that raced with unregister must not look successful.
            shared.ensure_registered().and(result)
        };
        shared.pump();
        result
    }
}

impl Shared {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_registered(&self) -> Result<()> {
        if self.is_released() {
            Err(Error::ReaderUnregistered)
        } else {
            Ok(())
        }
    }

    /// Queue a driver notification and apply it if nobody holds the lock
    fn post(&self, stimulus: Stimulus) {
        if self.is_released() {
            trace!(reader = %self.name, ?stimulus, "Notification after unregister ignored");
            return;
        }
        let _ = self.mailbox.0.send(stimulus);
        self.pump();
    }

    /// Apply queued notifications until the mailbox is empty or the lock is
    /// held elsewhere; the holder pumps again after releasing it.
    fn pump(&self) {
        while !self.mailbox.1.is_empty() {
            let Some(mut inner) = self.inner.try_lock() else {
                return;
            };
            self.drain(&mut inner);
        }
    }

    fn drain(&self, inner: &mut Inner) {
        while let Ok(stimulus) = self.mailbox.1.try_recv() {
            if self.is_released() {
                continue;
            }
            match stimulus {
                Stimulus::CardRemoved => self.on_removal_notified(inner),
                Stimulus::CardInserted => self.on_insertion_notified(inner),
            }
        }
    }

    fn on_removal_notified(&self, inner: &mut Inner) {
        if inner.state == MonitoringState::WaitForCardInsertion {
            trace!(reader = %self.name, "Removal notification without card ignored");
            return;
        }
        self.remove(inner);
    }

    fn on_insertion_notified(&self, inner: &mut Inner) {
        if inner.state != MonitoringState::WaitForCardInsertion {
            trace!(reader = %self.name, state = %inner.state, "Insertion notification ignored");
            return;
        }
        if let Err(e) = self.insert(inner) {
            warn!(reader = %self.name, error = %e, "Failed to open channel on insertion notification");
        }
    }

    fn switch_state(&self, inner: &mut Inner, state: MonitoringState) {
        debug!(reader = %self.name, from = %inner.state, to = %state, "Switching state");
        inner.state = state;
    }

    fn insert(&self, inner: &mut Inner) -> Result<()> {
        inner.channel.open()?;
        let power_on_data = inner
            .channel
            .power_on_data()
            .cloned()
            .ok_or_else(|| Error::CardIo("channel closed right after opening".into()))?;

        self.switch_state(inner, MonitoringState::WaitForCardProcessing);
        info!(reader = %self.name, power_on_data = %hex::encode_upper(&power_on_data), "Card inserted");
        self.dispatcher.publish(CardEvent::Inserted {
            reader: self.name.to_string(),
            power_on_data,
        });
        Ok(())
    }

    /// Close whatever is left of the channel and go back to waiting
    ///
    /// A failed close is logged; the transition always completes.
    fn remove(&self, inner: &mut Inner) {
        if let Err(e) = inner.channel.close() {
            warn!(reader = %self.name, error = %e, "Failed to close physical channel on removal");
        }
        self.switch_state(inner, MonitoringState::WaitForCardInsertion);
        info!(reader = %self.name, "Card removed");
        self.dispatcher.publish(CardEvent::Removed {
            reader: self.name.to_string(),
        });
    }

    fn transmit(&self, inner: &mut Inner, command: &[u8]) -> Result<Bytes> {
        if inner.state != MonitoringState::WaitForCardProcessing {
            return Err(Error::contract(
                "transmit is only allowed while a card is being processed",
            ));
        }
        let polled = self.config.presence_strategy.polls_during_processing();
        if polled {
            self.poll_during_processing(inner)?;
        }

        match self.exchange.transmit(&mut inner.channel, command) {
            Ok(response) => {
                if polled {
                    self.poll_during_processing(inner)?;
                }
                Ok(response)
            }
            Err(e) if polled && e.is_io() => {
                // A failed exchange is often the first sign of a withdrawn card.
                match self.poll_during_processing(inner) {
                    Err(Error::CardRemovedDuringProcessing) => {
                        Err(Error::CardRemovedDuringProcessing)
                    }
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn poll_during_processing(&self, inner: &mut Inner) -> Result<()> {
        let strategy = self.config.presence_strategy;
        match strategy.poll_once(&mut inner.channel)? {
            CardPresence::StillPresent => Ok(()),
            CardPresence::Removed => {
                debug!(reader = %self.name, "Card removed during processing");
                self.remove(inner);
                Err(Error::CardRemovedDuringProcessing)
            }
        }
    }

    fn finalize(&self, inner: &mut Inner) -> Result<()> {
        if inner.state != MonitoringState::WaitForCardProcessing {
            return Err(Error::contract(
                "processing can only be finalized while a card is being processed",
            ));
        }
        let strategy = self.config.presence_strategy;
        self.switch_state(inner, MonitoringState::WaitForCardRemoval(strategy));

        // The transition has happened; a failed presence check is left to check_removal.
        match strategy.on_enter_removal_wait(&mut inner.channel) {
            Ok(CardPresence::Removed) => self.remove(inner),
            Ok(CardPresence::StillPresent) => {}
            Err(e) if e.is_io() => {
                warn!(reader = %self.name, error = %e, "Presence check failed after processing");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn check_removal(&self, inner: &mut Inner) -> Result<bool> {
        let strategy = self.config.presence_strategy;
        match inner.state {
            MonitoringState::WaitForCardInsertion => Ok(false),
            MonitoringState::WaitForCardProcessing
                if strategy == PresenceStrategy::PolledAfterProcessing =>
            {
                Ok(false)
            }
            MonitoringState::WaitForCardProcessing | MonitoringState::WaitForCardRemoval(_) => {
                match strategy.poll_once(&mut inner.channel)? {
                    CardPresence::StillPresent => Ok(false),
                    CardPresence::Removed => {
                        self.remove(inner);
                        Ok(true)
                    }
                }
            }
        }
    }
}

/// Entry point for drivers that detect card removal on their own
///
/// Holds a weak reference: notifying a dropped reader does nothing. Safe to
/// call from any thread, and duplicates are ignored.
#[derive(Debug, Clone)]
pub struct CardRemovalNotifier {
    reader: Weak<Shared>,
}

impl CardRemovalNotifier {
    /// Report that the card has been removed
    pub fn notify_card_removed(&self) {
        if let Some(shared) = self.reader.upgrade() {
            trace!(reader = %shared.name, "Card removal notified");
            shared.post(Stimulus::CardRemoved);
        }
    }
}

/// Entry point for drivers that detect card insertion on their own
#[derive(Debug, Clone)]
pub struct CardInsertionNotifier {
    reader: Weak<Shared>,
}

impl CardInsertionNotifier {
    /// Report that a card has been inserted
    pub fn notify_card_inserted(&self) {
        if let Some(shared) = self.reader.upgrade() {
            trace!(reader = %shared.name, "Card insertion notified");
            shared.post(Stimulus::CardInserted);
        }
    }
}
