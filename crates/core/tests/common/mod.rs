//! Scripted reader driver shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use apdu_reader_core::{Bytes, DriverError, ReaderDriver};
use parking_lot::{Mutex, MutexGuard};

/// Hardware state a test drives from outside the reader
#[derive(Debug, Default)]
pub(crate) struct Hardware {
    pub(crate) present: bool,
    pub(crate) channel_open: bool,
    pub(crate) atr: Vec<u8>,
    pub(crate) presence_script: VecDeque<Result<bool, DriverError>>,
    pub(crate) responses: VecDeque<Result<Bytes, DriverError>>,
    pub(crate) commands: Vec<Bytes>,
    pub(crate) presence_checks: usize,
    /// Time every presence check takes
    pub(crate) check_delay: Duration,
    pub(crate) unregistered: bool,
}

/// Driver whose hardware is a shared, scripted [`Hardware`]
#[derive(Debug, Clone)]
pub(crate) struct ScriptedDriver {
    name: String,
    hardware: Arc<Mutex<Hardware>>,
}

impl ScriptedDriver {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hardware: Arc::new(Mutex::new(Hardware {
                atr: vec![0x3B, 0x88, 0x80, 0x01],
                ..Default::default()
            })),
        }
    }

    pub(crate) fn hardware(&self) -> MutexGuard<'_, Hardware> {
        self.hardware.lock()
    }

    pub(crate) fn insert_card(&self) {
        self.hardware().present = true;
    }

    pub(crate) fn remove_card(&self) {
        let mut hardware = self.hardware();
        hardware.present = false;
        hardware.channel_open = false;
    }

    pub(crate) fn respond(&self, response: &str) {
        let bytes = hex::decode(response).expect("valid hex response");
        self.hardware().responses.push_back(Ok(Bytes::from(bytes)));
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.hardware()
            .commands
            .iter()
            .map(hex::encode_upper)
            .collect()
    }
}

impl ReaderDriver for ScriptedDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_protocol_supported(&self, protocol: &str) -> bool {
        protocol == "ISO_14443_4"
    }

    fn activate_protocol(&mut self, _protocol: &str) {}

    fn deactivate_protocol(&mut self, _protocol: &str) {}

    fn is_current_protocol(&self, protocol: &str) -> bool {
        protocol == "ISO_14443_4"
    }

    fn open_physical_channel(&mut self) -> Result<(), DriverError> {
        let mut hardware = self.hardware();
        if !hardware.present {
            return Err(DriverError::card_io("no card in the field"));
        }
        hardware.channel_open = true;
        Ok(())
    }

    fn close_physical_channel(&mut self) -> Result<(), DriverError> {
        self.hardware().channel_open = false;
        Ok(())
    }

    fn is_physical_channel_open(&self) -> bool {
        self.hardware().channel_open
    }

    fn check_card_presence(&mut self) -> Result<bool, DriverError> {
        let delay = self.hardware().check_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let mut hardware = self.hardware();
        hardware.presence_checks += 1;
        match hardware.presence_script.pop_front() {
            Some(result) => result,
            None => Ok(hardware.present),
        }
    }

    fn power_on_data(&self) -> Bytes {
        Bytes::copy_from_slice(&self.hardware().atr)
    }

    fn do_transmit_raw(&mut self, apdu: &[u8]) -> Result<Bytes, DriverError> {
        let mut hardware = self.hardware();
        if !hardware.channel_open {
            return Err(DriverError::card_io("channel closed"));
        }
        hardware.commands.push(Bytes::copy_from_slice(apdu));
        hardware
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(Bytes::from_static(&[0x90, 0x00])))
    }

    fn is_contactless(&self) -> bool {
        true
    }

    fn unregister(&mut self) {
        self.hardware().unregistered = true;
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
