//! End-to-end lifecycle of an observable reader over a scripted driver

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use apdu_reader_core::prelude::*;
use apdu_reader_core::{CardEventReceiver, InsertionMode};
use common::{ScriptedDriver, init_tracing};

fn observable(strategy: PresenceStrategy) -> (ObservableReader, ScriptedDriver, CardEventReceiver) {
    init_tracing();
    let driver = ScriptedDriver::new("ACS ACR122U 00 00");
    let hardware = driver.clone();
    let reader = ObservableReader::new(driver, ReaderConfig::new(strategy)).unwrap();
    let events = reader.subscribe();
    (reader, hardware, events)
}

fn drain(reader: &ObservableReader, events: &CardEventReceiver) -> Vec<CardEventKind> {
    reader.flush_events();
    events.try_iter().map(|event| event.kind()).collect()
}

fn assert_alternating(kinds: &[CardEventKind]) {
    for (index, kind) in kinds.iter().enumerate() {
        let expected = if index % 2 == 0 {
            CardEventKind::Inserted
        } else {
            CardEventKind::Removed
        };
        assert_eq!(*kind, expected, "event #{index} out of order: {kinds:?}");
    }
}

#[test]
fn test_select_not_found_then_polled_removal() {
    let (reader, hardware, events) = observable(PresenceStrategy::PolledAfterProcessing);

    hardware.insert_card();
    assert!(reader.detect_insertion().unwrap());
    reader.flush_events();
    assert_eq!(
        events.try_recv().unwrap(),
        CardEvent::Inserted {
            reader: "ACS ACR122U 00 00".into(),
            power_on_data: Bytes::from_static(&[0x3B, 0x88, 0x80, 0x01]),
        }
    );

    hardware.respond("6A82");
    let response = reader.transmit(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
    assert_eq!(response.as_ref(), &[0x6A, 0x82]);
    assert_eq!(hardware.commands(), vec!["00A40400"]);

    reader.finalize_card_processing().unwrap();
    assert_eq!(
        reader.state(),
        MonitoringState::WaitForCardRemoval(PresenceStrategy::PolledAfterProcessing)
    );
    assert!(!hardware.hardware().channel_open);

    assert!(!reader.check_removal().unwrap());
    hardware.remove_card();
    assert!(reader.check_removal().unwrap());

    assert_eq!(reader.state(), MonitoringState::WaitForCardInsertion);
    assert_eq!(drain(&reader, &events), vec![CardEventKind::Removed]);
}

#[test]
fn test_get_response_chaining_through_reader() {
    let (reader, hardware, _events) = observable(PresenceStrategy::PolledDuringProcessing);
    hardware.insert_card();
    reader.detect_insertion().unwrap();

    hardware.respond("6110");
    hardware.respond("00112233445566778899AABBCCDDEEFF9000");

    let response = reader.transmit(&[0x00, 0xCA, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(
        hex::encode_upper(&response),
        "00112233445566778899AABBCCDDEEFF9000"
    );
    assert_eq!(hardware.commands(), vec!["00CA000000", "00C0000010"]);
    // One poll before and one after the logical exchange.
    assert_eq!(hardware.hardware().presence_checks, 3);
}

#[test]
fn test_get_response_class_is_configurable() {
    init_tracing();
    let driver = ScriptedDriver::new("SAM reader");
    let hardware = driver.clone();
    let strategy = PresenceStrategy::PolledAfterProcessing;
    let config = ReaderConfig::new(strategy).with_get_response_class(0x80);
    let reader = ObservableReader::new(driver, config).unwrap();

    hardware.insert_card();
    reader.detect_insertion().unwrap();
    hardware.respond("CAFE6102");
    hardware.respond("BABE9000");

    let response = reader.transmit(&[0x80, 0xCA, 0x9F, 0x7F]).unwrap();
    assert_eq!(hex::encode_upper(&response), "CAFEBABE9000");
    assert_eq!(hardware.commands()[1], "80C0000002");
}

#[test]
fn test_events_alternate_for_every_strategy() {
    for strategy in [
        PresenceStrategy::Autonomous,
        PresenceStrategy::PolledDuringProcessing,
        PresenceStrategy::PolledAfterProcessing,
    ] {
        let (reader, hardware, events) = observable(strategy);
        let notifier = reader.removal_notifier().ok();

        for _ in 0..5 {
            hardware.insert_card();
            assert!(reader.detect_insertion().unwrap());
            reader.transmit(&[0x00, 0xB0, 0x00, 0x00]).unwrap();
            reader.finalize_card_processing().unwrap();

            hardware.remove_card();
            match &notifier {
                Some(notifier) => {
                    notifier.notify_card_removed();
                    notifier.notify_card_removed();
                }
                None => assert!(reader.check_removal().unwrap()),
            }
            assert_eq!(reader.state(), MonitoringState::WaitForCardInsertion);
        }

        let kinds = drain(&reader, &events);
        assert_eq!(kinds.len(), 10, "{strategy}: {kinds:?}");
        assert_alternating(&kinds);
    }
}

#[test]
fn test_concurrent_removal_notifications_yield_one_event() {
    let (reader, hardware, events) = observable(PresenceStrategy::Autonomous);
    hardware.insert_card();
    reader.detect_insertion().unwrap();
    reader.finalize_card_processing().unwrap();
    hardware.remove_card();

    let notifier = reader.removal_notifier().unwrap();
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let notifier = notifier.clone();
            thread::spawn(move || notifier.notify_card_removed())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(reader.state(), MonitoringState::WaitForCardInsertion);
    assert_eq!(
        drain(&reader, &events),
        vec![CardEventKind::Inserted, CardEventKind::Removed]
    );
}

#[test]
fn test_removal_races_with_exchanges() {
    let (reader, hardware, events) = observable(PresenceStrategy::Autonomous);
    hardware.insert_card();
    reader.detect_insertion().unwrap();
    let notifier = reader.removal_notifier().unwrap();

    let exchanging = {
        let reader = reader.clone();
        thread::spawn(move || {
            // Every outcome is acceptable here except a torn state.
            for _ in 0..100 {
                let _ = reader.transmit(&[0x00, 0xB0, 0x00, 0x00]);
            }
        })
    };
    hardware.remove_card();
    notifier.notify_card_removed();
    exchanging.join().unwrap();

    assert_eq!(reader.state(), MonitoringState::WaitForCardInsertion);
    assert_eq!(
        reader.transmit(&[0x00, 0xB0, 0x00, 0x00]),
        Err(Error::contract(
            "transmit is only allowed while a card is being processed"
        ))
    );
    assert_eq!(
        drain(&reader, &events),
        vec![CardEventKind::Inserted, CardEventKind::Removed]
    );
}

#[test]
fn test_autonomous_insertion_and_removal() {
    init_tracing();
    let driver = ScriptedDriver::new("NFC field");
    let hardware = driver.clone();
    let config = ReaderConfig::new(PresenceStrategy::Autonomous)
        .with_insertion_mode(InsertionMode::Autonomous);
    let reader = ObservableReader::new(driver, config).unwrap();

    let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
    reader.add_observer({
        let received = Arc::clone(&received);
        move |event: &CardEvent| received.lock().push(event.kind())
    });

    let inserted = reader.insertion_notifier().unwrap();
    let removed = reader.removal_notifier().unwrap();
    for _ in 0..3 {
        hardware.insert_card();
        inserted.notify_card_inserted();
        hardware.remove_card();
        removed.notify_card_removed();
    }

    reader.flush_events();
    let kinds = received.lock().clone();
    assert_eq!(kinds.len(), 6);
    assert_alternating(&kinds);
}

#[test]
fn test_unregister_releases_everything() {
    let (reader, hardware, events) = observable(PresenceStrategy::PolledDuringProcessing);
    hardware.insert_card();
    reader.detect_insertion().unwrap();

    reader.unregister();
    assert!(reader.is_unregistered());
    assert!(hardware.hardware().unregistered);
    assert!(!hardware.hardware().channel_open);

    for result in [
        reader.detect_insertion(),
        reader.check_removal(),
        reader.is_card_present(),
    ] {
        assert_eq!(result, Err(Error::ReaderUnregistered));
    }
    assert_eq!(
        reader.finalize_card_processing(),
        Err(Error::ReaderUnregistered)
    );

    // Events emitted before unregistering are still delivered, nothing after.
    let kinds: Vec<_> = events.try_iter().map(|event| event.kind()).collect();
    assert_eq!(kinds, vec![CardEventKind::Inserted]);
}

#[test]
fn test_unregister_during_exchanges() {
    let (reader, hardware, _events) = observable(PresenceStrategy::PolledDuringProcessing);
    hardware.insert_card();
    reader.detect_insertion().unwrap();

    let exchanging = {
        let reader = reader.clone();
        thread::spawn(move || {
            loop {
                match reader.transmit(&[0x00, 0xB0, 0x00, 0x00]) {
                    Ok(_) => continue,
                    Err(error) => return error,
                }
            }
        })
    };
    reader.unregister();

    assert_eq!(exchanging.join().unwrap(), Error::ReaderUnregistered);
}

fn poll_until_error(
    reader: &ObservableReader,
    poll: fn(&ObservableReader) -> Result<bool>,
) -> thread::JoinHandle<Error> {
    let reader = reader.clone();
    thread::spawn(move || {
        loop {
            if let Err(error) = poll(&reader) {
                return error;
            }
        }
    })
}

fn wait_for_presence_checks(hardware: &ScriptedDriver, count: usize) {
    while hardware.hardware().presence_checks < count {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_unregister_during_removal_polls() {
    let (reader, hardware, _events) = observable(PresenceStrategy::PolledDuringProcessing);
    hardware.insert_card();
    reader.detect_insertion().unwrap();
    reader.finalize_card_processing().unwrap();
    hardware.hardware().check_delay = Duration::from_millis(5);

    let polling = poll_until_error(&reader, ObservableReader::check_removal);
    wait_for_presence_checks(&hardware, 3);
    reader.unregister();

    assert_eq!(polling.join().unwrap(), Error::ReaderUnregistered);
    assert_eq!(
        reader.state(),
        MonitoringState::WaitForCardRemoval(PresenceStrategy::PolledDuringProcessing)
    );
}

#[test]
fn test_unregister_during_insertion_polls() {
    let (reader, hardware, events) = observable(PresenceStrategy::PolledAfterProcessing);
    hardware.hardware().check_delay = Duration::from_millis(5);

    let polling = poll_until_error(&reader, ObservableReader::detect_insertion);
    wait_for_presence_checks(&hardware, 2);
    reader.unregister();

    assert_eq!(polling.join().unwrap(), Error::ReaderUnregistered);
    assert!(events.try_recv().is_err());
}
