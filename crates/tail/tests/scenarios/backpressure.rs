//! Bulk drains into sinks that fill up

use crate::common::{append, config, wait_until};
use crossbeam_channel::bounded;
use logtrail_core::{BoundedSink, Drain, Line, MemoryOffsetStore};
use logtrail_tail::Tailer;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn numbered(count: usize) -> String {
    (1..=count).map(|i| format!("entry {}\n", i)).collect()
}

#[test]
fn test_queue_full_loses_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bulk.log");
    fs::write(&path, numbered(10)).unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();

    let mut first = BoundedSink::new(4);
    let outcome = stream.drain_to(&mut first, 10).unwrap();
    assert_eq!(outcome, Drain::QueueFull);
    assert_eq!(outcome.code(), Drain::QUEUE_FULL);
    assert_eq!(first.len(), 4);

    let mut second = Vec::new();
    assert_eq!(stream.drain_to(&mut second, 100).unwrap(), Drain::Moved(6));

    let numbers: Vec<u64> = first
        .into_inner()
        .iter()
        .chain(second.iter())
        .map(|l| l.line_number)
        .collect();
    assert_eq!(numbers, (1..=10).collect::<Vec<u64>>());
    assert_eq!(second[0].text(), "entry 5");
}

#[test]
fn test_channel_sink_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("channel.log");
    fs::write(&path, numbered(7)).unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();
    let (mut tx, rx) = bounded::<Line>(3);

    let mut received = Vec::new();
    loop {
        match stream.drain_to(&mut tx, 100).unwrap() {
            Drain::QueueFull => received.extend(rx.try_iter()),
            Drain::Moved(_) => {
                received.extend(rx.try_iter());
                break;
            }
            Drain::EndOfStream => unreachable!("monitored file does not end"),
        }
    }
    let texts: Vec<String> = received.iter().map(|l| l.text().into_owned()).collect();
    let expected: Vec<String> = (1..=7).map(|i| format!("entry {}", i)).collect();
    assert_eq!(texts, expected);
}

#[test]
fn test_drain_picks_up_appends() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let path = dir.join("grow.log");
    fs::write(&path, b"").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();
    let mut sink = Vec::new();
    assert_eq!(folder.drain_to(&mut sink, 10).unwrap(), Drain::Moved(0));

    append(&path, b"x\ny\n");
    assert!(wait_until(|| {
        folder.drain_to(&mut sink, 10).unwrap();
        sink.len() == 2
    }));
    assert_eq!(sink[1].line_number, 2);
}
