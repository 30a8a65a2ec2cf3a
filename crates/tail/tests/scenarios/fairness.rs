//! A bursty file does not starve a quiet one

use crate::common::{append, collect_lines, config, next_line, texts};
use logtrail_core::MemoryOffsetStore;
use logtrail_tail::Tailer;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_trickle_surfaces_within_one_buffer_of_burst() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.log");
    let b = temp_dir.path().join("b.log");
    let burst: String = (0..40).map(|i| format!("a{:03}\n", i)).collect();
    fs::write(&a, burst).unwrap();
    fs::write(&b, b"b000\n").unwrap();

    let mut config = config();
    config.reader.buffer_size = 64;
    let tailer = Tailer::with_store(config, Arc::new(MemoryOffsetStore::new()));
    let aggregate = tailer.tail_paths(&[&a, &b]).unwrap();

    let lines = texts(&collect_lines(&aggregate, 41));
    let b_at = lines.iter().position(|l| l == "b000").unwrap();
    // One 64-byte buffer holds 12 complete 5-byte lines
    assert!(b_at <= 13, "b000 delivered at {}", b_at);

    let a_only: Vec<&String> = lines.iter().filter(|l| l.starts_with('a')).collect();
    let expected: Vec<String> = (0..40).map(|i| format!("a{:03}", i)).collect();
    assert_eq!(a_only, expected.iter().collect::<Vec<_>>());
}

#[test]
fn test_requeued_file_interleaves_with_second_burst() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.log");
    let b = temp_dir.path().join("b.log");
    fs::write(&a, b"").unwrap();
    fs::write(&b, b"").unwrap();

    let mut config = config();
    config.reader.buffer_size = 64;
    let tailer = Tailer::with_store(config, Arc::new(MemoryOffsetStore::new()));
    let aggregate = tailer.tail_paths(&[&a, &b]).unwrap();

    append(&b, b"b1\n");
    assert_eq!(next_line(&aggregate).text(), "b1");

    let first_burst: String = (0..5).map(|i| format!("x{}\n", i)).collect();
    append(&a, first_burst.as_bytes());
    assert_eq!(next_line(&aggregate).text(), "x0");

    // Let the change to b reach the aggregate before a's second burst
    append(&b, b"b2\n");
    thread::sleep(Duration::from_millis(300));
    let second_burst: String = (0..30).map(|i| format!("y{:02}\n", i)).collect();
    append(&a, second_burst.as_bytes());

    let rest = texts(&collect_lines(&aggregate, 35));
    let b2 = rest.iter().position(|l| l == "b2").unwrap();
    let last_y = rest.iter().position(|l| l == "y29").unwrap();
    assert!(b2 < last_y, "b2 starved: {:?}", rest);
}
