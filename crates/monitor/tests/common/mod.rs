//! Reader driver simulating a card in the field

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Once};

use apdu_reader_core::{Bytes, DriverError, ReaderDriver};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Field {
    present: bool,
    channel_open: bool,
    presence_failures: VecDeque<DriverError>,
    presence_checks: usize,
}

/// Driver whose card can be moved in and out of the field by the test
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldDriver {
    field: Arc<Mutex<Field>>,
}

impl FieldDriver {
    pub(crate) fn insert_card(&self) {
        self.field.lock().present = true;
    }

    pub(crate) fn remove_card(&self) {
        let mut field = self.field.lock();
        field.present = false;
        field.channel_open = false;
    }

    /// Make the next presence probes fail
    pub(crate) fn fail_presence_checks(&self, count: usize) {
        let mut field = self.field.lock();
        for _ in 0..count {
            field
                .presence_failures
                .push_back(DriverError::reader_io("reader not responding"));
        }
    }

    pub(crate) fn presence_checks(&self) -> usize {
        self.field.lock().presence_checks
    }
}

impl ReaderDriver for FieldDriver {
    fn name(&self) -> &str {
        "Identiv uTrust 3700 F"
    }

    fn is_protocol_supported(&self, _protocol: &str) -> bool {
        false
    }

    fn activate_protocol(&mut self, _protocol: &str) {}

    fn deactivate_protocol(&mut self, _protocol: &str) {}

    fn is_current_protocol(&self, _protocol: &str) -> bool {
        false
    }

    fn open_physical_channel(&mut self) -> Result<(), DriverError> {
        let mut field = self.field.lock();
        if !field.present {
            return Err(DriverError::card_io("no card in the field"));
        }
        field.channel_open = true;
        Ok(())
    }

    fn close_physical_channel(&mut self) -> Result<(), DriverError> {
        self.field.lock().channel_open = false;
        Ok(())
    }

    fn is_physical_channel_open(&self) -> bool {
        self.field.lock().channel_open
    }

    fn check_card_presence(&mut self) -> Result<bool, DriverError> {
        let mut field = self.field.lock();
        field.presence_checks += 1;
        match field.presence_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(field.present),
        }
    }

    fn power_on_data(&self) -> Bytes {
        Bytes::from_static(&[0x3B, 0x8A, 0x80, 0x01])
    }

    fn do_transmit_raw(&mut self, _apdu: &[u8]) -> Result<Bytes, DriverError> {
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }

    fn is_contactless(&self) -> bool {
        true
    }
}

/// Route tracing output to the test harness, filtered by `RUST_LOG`
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
