//! Background monitoring of observable smart card readers
//!
//! A [`ReaderMonitor`] owns one thread per reader that turns the polled
//! stimuli of an [`ObservableReader`](apdu_reader_core::ObservableReader) into
//! lifecycle transitions: insertion probes while no card is present, removal
//! probes once the strategy calls for them.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod handler;
pub mod monitor;

mod error;
pub use error::{MonitorError, Result};

pub use config::{DetectionMode, MonitorConfig};
pub use handler::{LoggingErrorHandler, ObservationErrorHandler};
pub use monitor::ReaderMonitor;
