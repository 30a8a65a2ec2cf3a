//! Renamed files keep their identity and byte offset

use crate::common::{append, collect_lines, config, next_line, poll_config, texts, wait_until};
use logtrail_core::{MemoryOffsetStore, TailConfig};
use logtrail_tail::Tailer;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn rename_continues_offset(config: TailConfig) {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let f1 = dir.join("f1.log");
    let f2 = dir.join("f2.log");
    fs::write(&f1, b"a\nb\n").unwrap();

    let tailer = Tailer::with_store(config, Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();
    let first = collect_lines(&folder, 2);
    assert_eq!(texts(&first), vec!["a", "b"]);
    let logical_id = folder.list_content_info(false)[0].logical_id;

    fs::rename(&f1, &f2).unwrap();
    append(&f2, b"c\nd\n");

    let rest = collect_lines(&folder, 2);
    assert_eq!(texts(&rest), vec!["c", "d"]);
    assert_eq!(rest[0].line_number, 3);
    assert_eq!(rest[0].offset, 4);
    assert_eq!(rest[0].source.key, first[0].source.key);

    assert!(wait_until(|| {
        let infos = folder.list_content_info(false);
        infos.len() == 1 && infos[0].current_path == f2
    }));
    let info = &folder.list_content_info(true)[0];
    assert_eq!(info.logical_id, logical_id);
    assert_eq!(info.original_path, f1);
    assert_eq!(info.byte_offset, 8);
    assert_eq!(info.length, 8);
}

#[test]
fn test_rename_native_backend() {
    rename_continues_offset(config());
}

#[test]
fn test_rename_poll_backend() {
    rename_continues_offset(poll_config());
}

#[test]
fn test_single_file_stream_ends_on_rename() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("single.log");
    fs::write(&path, b"one\n").unwrap();

    let store = Arc::new(MemoryOffsetStore::new());
    let tailer = Tailer::with_store(config(), store.clone());
    let stream = tailer.tail_file(&path).unwrap();
    assert_eq!(next_line(&stream).text(), "one");

    fs::rename(&path, temp_dir.path().join("single.log.1")).unwrap();
    let outcome = stream.poll(crate::common::WAIT);
    assert!(matches!(outcome, Err(logtrail_core::Error::EndOfStream)));
    assert_eq!(store.len(), 1);
}
