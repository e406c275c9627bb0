//! Background monitoring thread for one reader

use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use apdu_reader_core::{
    CardEventKind, CardEventReceiver, ChannelObserver, Error, InsertionMode, MonitoringState,
    ObservableReader, ObserverId,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{debug, error, info, trace};

use crate::config::{DetectionMode, MonitorConfig};
use crate::error::{MonitorError, Result};
use crate::handler::ObservationErrorHandler;

/// Drives the polled stimuli of an observable reader on a dedicated thread
///
/// Depending on the lifecycle state, the monitor probes for insertion or
/// removal and then sleeps for the configured interval. Autonomous stimuli are
/// left to the driver. Failures go to the [`ObservationErrorHandler`] and the
/// monitor keeps going; it exits once the reader is unregistered, when
/// [`stop`](Self::stop) is called, or when it is dropped.
#[derive(Debug)]
pub struct ReaderMonitor {
    /// Monitored reader
    reader: ObservableReader,
    /// Dropped to wake the thread up and stop it
    stop: Option<Sender<()>>,
    /// Monitoring thread
    worker: Option<JoinHandle<()>>,
    /// Id of the monitoring thread
    worker_id: ThreadId,
}

impl ReaderMonitor {
    /// Start monitoring a reader
    pub fn start<H>(reader: ObservableReader, config: MonitorConfig, handler: H) -> Result<Self>
    where
        H: ObservationErrorHandler + 'static,
    {
        if reader.is_unregistered() {
            return Err(MonitorError::Unregistered(reader.name().to_string()));
        }

        let (stop, stopped) = bounded(0);
        // Single-shot monitoring watches the events for the first removal.
        let removals = (config.detection_mode == DetectionMode::SingleShot).then(|| {
            let (sender, events) = unbounded();
            (reader.add_observer(ChannelObserver(sender)), events)
        });
        let observer = removals.as_ref().map(|(id, _)| *id);

        let job = MonitoringJob {
            reader: reader.clone(),
            config,
            handler,
            stop: stopped,
            removals,
        };
        let worker = thread::Builder::new()
            .name(format!("reader-monitor-{}", reader.name()))
            .spawn(move || job.run());
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                if let Some(observer) = observer {
                    reader.remove_observer(observer);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            reader,
            stop: Some(stop),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    /// The monitored reader
    pub const fn reader(&self) -> &ObservableReader {
        &self.reader
    }

    /// Whether the monitoring thread is still running
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stop monitoring and wait for the thread to exit
    pub fn stop(&mut self) {
        drop(self.stop.take());
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(reader = self.reader.name(), "Monitor thread panicked");
            }
        }
    }

    /// Wait for the monitor to end on its own
    ///
    /// Returns once the reader is unregistered or, in
    /// [`DetectionMode::SingleShot`], once the first card has been removed.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(reader = self.reader.name(), "Monitor thread panicked");
            }
        }
    }
}

impl Drop for ReaderMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the monitoring thread
struct MonitoringJob<H> {
    reader: ObservableReader,
    config: MonitorConfig,
    handler: H,
    stop: Receiver<()>,
    /// Observer and its events, in single-shot mode only
    removals: Option<(ObserverId, CardEventReceiver)>,
}

impl<H: ObservationErrorHandler> MonitoringJob<H> {
    fn run(self) {
        let reader = self.reader.name();
        info!(
            reader,
            mode = %self.config.detection_mode,
            strategy = %self.reader.strategy(),
            "Reader monitoring started"
        );

        loop {
            if self.reader.is_unregistered() {
                debug!(reader, "Reader unregistered");
                break;
            }

            let state = self.reader.state();
            trace!(reader, %state, "Monitor tick");
            match self.probe(state) {
                Ok(()) => {}
                Err(Error::ReaderUnregistered) => {
                    debug!(reader, "Reader unregistered while probing");
                    break;
                }
                Err(e) => self.handler.on_observation_error(reader, &e),
            }
            let interval = self.interval(state);

            if self.first_card_removed() {
                debug!(reader, "First card removed, single-shot monitoring done");
                break;
            }

            match self.stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!(reader, "Monitor stop requested");
                    break;
                }
            }
        }

        if let Some((observer, _)) = &self.removals {
            self.reader.remove_observer(*observer);
        }
        info!(reader, "Reader monitoring stopped");
    }

    /// Probe whatever the state calls for
    fn probe(&self, state: MonitoringState) -> std::result::Result<(), Error> {
        match state {
            MonitoringState::WaitForCardInsertion => {
                if self.reader.config().insertion_mode == InsertionMode::Polled {
                    self.reader.detect_insertion()?;
                }
            }
            MonitoringState::WaitForCardProcessing => {
                if self.reader.strategy().polls_during_processing() {
                    self.reader.check_removal()?;
                }
            }
            MonitoringState::WaitForCardRemoval(strategy) => {
                if strategy.is_polled() {
                    self.reader.check_removal()?;
                }
            }
        }
        Ok(())
    }

    /// Pause after a tick in the given state, whether its probe failed or not
    const fn interval(&self, state: MonitoringState) -> Duration {
        match state {
            MonitoringState::WaitForCardInsertion => self.config.insertion_poll_interval,
            MonitoringState::WaitForCardProcessing | MonitoringState::WaitForCardRemoval(_) => {
                self.config.removal_poll_interval
            }
        }
    }

    fn first_card_removed(&self) -> bool {
        let Some((_, events)) = &self.removals else {
            return false;
        };
        self.reader.flush_events();
        events
            .try_iter()
            .any(|event| event.kind() == CardEventKind::Removed)
    }
}
