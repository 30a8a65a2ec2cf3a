//! Timeout, data and end of stream are told apart

use crate::common::{config, next_line, WAIT};
use logtrail_core::{Error, MemoryOffsetStore};
use logtrail_tail::Tailer;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_idle_poll_never_returns_early() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("idle.log");
    fs::write(&path, b"").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();

    for millis in [30, 120] {
        let timeout = Duration::from_millis(millis);
        let started = Instant::now();
        assert!(stream.poll(timeout).unwrap().is_none());
        assert!(started.elapsed() >= timeout);
    }
}

#[test]
fn test_unmonitored_file_signals_end_of_stream() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("vanishing.log");
    fs::write(&path, b"only\n").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();
    assert_eq!(next_line(&stream).text(), "only");
    assert!(stream.poll(Duration::from_millis(50)).unwrap().is_none());

    fs::remove_file(&path).unwrap();
    assert!(matches!(stream.poll(WAIT), Err(Error::EndOfStream)));
    assert!(matches!(stream.try_poll(), Err(Error::EndOfStream)));
}

#[test]
fn test_static_stream_ends_instead_of_waiting() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("static.log");
    fs::write(&path, b"one\ntwo").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.open_static(&path).unwrap();
    assert_eq!(stream.poll(WAIT).unwrap().unwrap().text(), "one");
    let last = stream.poll(WAIT).unwrap().unwrap();
    assert_eq!(last.text(), "two");
    assert!(!last.is_terminated());

    let started = Instant::now();
    assert!(matches!(stream.poll(WAIT), Err(Error::EndOfStream)));
    assert!(started.elapsed() < WAIT);
}

#[test]
fn test_close_wakes_folder_reader() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("quiet.log"), b"").unwrap();
    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let folder = Arc::new(tailer.tail_folder(temp_dir.path()).unwrap());

    let reader = {
        let folder = Arc::clone(&folder);
        thread::spawn(move || folder.take())
    };
    thread::sleep(Duration::from_millis(50));
    folder.close();
    assert!(matches!(reader.join().unwrap(), Err(Error::Closed)));
    assert!(matches!(folder.try_poll(), Err(Error::Closed)));
}

#[test]
fn test_empty_folder_ends_until_a_file_appears() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();

    let started = Instant::now();
    assert!(matches!(folder.poll(WAIT), Err(Error::EndOfStream)));
    assert!(started.elapsed() < WAIT);

    fs::write(dir.join("late.log"), b"arrived\n").unwrap();
    let deadline = Instant::now() + WAIT;
    let line = loop {
        match folder.poll(Duration::from_millis(50)) {
            Ok(Some(line)) => break line,
            Ok(None) | Err(Error::EndOfStream) => {
                assert!(Instant::now() < deadline, "no line from new file");
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    };
    assert_eq!(line.text(), "arrived");
    assert_eq!(line.line_number, 1);
}

#[test]
fn test_tailer_close_ends_file_stream() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("open.log");
    fs::write(&path, b"").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = Arc::new(tailer.tail_file(&path).unwrap());
    let reader = {
        let stream = Arc::clone(&stream);
        thread::spawn(move || stream.take())
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    tailer.close();
    assert!(matches!(reader.join().unwrap(), Err(Error::EndOfStream)));
    assert!(matches!(stream.poll(WAIT), Err(Error::EndOfStream)));
    assert!(started.elapsed() < WAIT);
}

#[test]
fn test_tailer_close_ends_folder() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("open.log"), b"").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(temp_dir.path()).unwrap();
    assert!(folder.poll(Duration::from_millis(50)).unwrap().is_none());

    let started = Instant::now();
    tailer.close();
    assert!(matches!(folder.poll(WAIT), Err(Error::EndOfStream)));
    assert!(started.elapsed() < WAIT);
}

#[test]
fn test_invalid_registrations_fail_synchronously() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("plain.log");
    fs::write(&file, b"").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    assert!(matches!(
        tailer.tail_folder(&file),
        Err(Error::InvalidRegistration { .. })
    ));
    assert!(matches!(
        tailer.tail_file(temp_dir.path()),
        Err(Error::InvalidRegistration { .. })
    ));
    assert!(matches!(
        tailer.tail_file(&temp_dir.path().join("missing.log")),
        Err(Error::InvalidRegistration { .. })
    ));
}
