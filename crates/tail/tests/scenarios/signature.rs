//! Content-signature identity

use crate::common::{append, collect_lines, next_line, signature_config, wait_until};
use logtrail_core::{FileKey, MemoryOffsetStore};
use logtrail_tail::Tailer;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_growing_file_keeps_signature_identity() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let path = dir.join("grow.log");
    fs::write(&path, b"start\n").unwrap();

    let tailer = Tailer::with_store(signature_config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();
    let first = next_line(&folder);
    assert!(matches!(first.source.key, Some(FileKey::Signature(_))));

    for i in 0..5 {
        append(&path, format!("more {}\n", i).as_bytes());
        let line = next_line(&folder);
        assert_eq!(line.source.key, first.source.key);
        assert_eq!(line.line_number, i as u64 + 2);
    }
    assert_eq!(folder.len(), 1);
}

#[test]
fn test_different_content_never_collides() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    fs::write(dir.join("a.log"), b"service a booting\n").unwrap();
    fs::write(dir.join("b.log"), b"service b booting\n").unwrap();

    let tailer = Tailer::with_store(signature_config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();
    let lines = collect_lines(&folder, 2);
    assert_ne!(lines[0].source.key, lines[1].source.key);
    assert_eq!(folder.list_content_info(false).len(), 2);
}

#[test]
fn test_rename_followed_by_signature() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let from = dir.join("worker.log");
    let to = dir.join("worker.log.1");
    fs::write(&from, b"worker header line\n").unwrap();

    let tailer = Tailer::with_store(signature_config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();
    let header = next_line(&folder);

    fs::rename(&from, &to).unwrap();
    append(&to, b"after rename\n");

    let next = next_line(&folder);
    assert_eq!(next.text(), "after rename");
    assert_eq!(next.line_number, 2);
    assert_eq!(next.source.key, header.source.key);
    assert!(wait_until(|| {
        let infos = folder.list_content_info(false);
        infos.len() == 1 && infos[0].current_path == to && infos[0].original_path == from
    }));
}
