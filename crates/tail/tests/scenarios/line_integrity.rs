//! Appended bytes come out as exactly their `\n`-delimited lines

use crate::common::{append, collect_lines, config, texts, WAIT};
use logtrail_core::MemoryOffsetStore;
use logtrail_tail::Tailer;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn expected_lines(rng: &mut ChaCha8Rng, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let padding = rng.gen_range(0..200);
            format!("line {} {}", i, "x".repeat(padding))
        })
        .collect()
}

/// Split `data` into random bursts, some far smaller and some far larger
/// than the reader buffer
fn bursts(rng: &mut ChaCha8Rng, data: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let size = if rng.gen_bool(0.3) {
            rng.gen_range(1..8)
        } else {
            rng.gen_range(8..2048)
        };
        let size = size.min(rest.len());
        out.push(rest[..size].to_vec());
        rest = &rest[size..];
    }
    out
}

fn run_seed(seed: u64) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("app.log");
    fs::write(&path, b"").unwrap();

    let mut config = config();
    config.reader.buffer_size = 64;
    let tailer = Tailer::with_store(config, Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let lines = expected_lines(&mut rng, 300);
    let data: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    let chunks = bursts(&mut rng, data.as_bytes());

    let writer = {
        let path = path.clone();
        thread::spawn(move || {
            for (i, chunk) in chunks.iter().enumerate() {
                append(&path, chunk);
                if i % 7 == 0 {
                    thread::sleep(Duration::from_millis(2));
                }
            }
        })
    };

    let received = collect_lines(&stream, lines.len());
    writer.join().unwrap();

    assert_eq!(texts(&received), lines, "seed {}", seed);
    for (i, line) in received.iter().enumerate() {
        assert_eq!(line.line_number, i as u64 + 1);
        assert!(line.is_terminated());
    }
    // Offsets tile the file
    for pair in received.windows(2) {
        assert_eq!(pair[0].end_offset(), pair[1].offset);
    }
    assert_eq!(stream.position().offset, data.len() as u64);
    assert!(stream.poll(Duration::from_millis(100)).unwrap().is_none());
}

#[test]
fn test_bursty_appends_frame_exactly() {
    for seed in [1, 7, 42] {
        run_seed(seed);
    }
}

#[test]
fn test_partial_line_waits_for_newline() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partial.log");
    fs::write(&path, b"").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();

    append(&path, b"hel");
    assert!(stream.poll(Duration::from_millis(200)).unwrap().is_none());
    append(&path, b"lo\r\n");
    let line = stream.poll(WAIT).unwrap().unwrap();
    assert_eq!(line.text(), "hello");
    assert_eq!(&line.bytes[..], b"hello\r\n");
}
