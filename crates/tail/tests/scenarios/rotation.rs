//! Rotation: the tailed name is taken over by a new file

use crate::common::{append, collect_lines, config, next_line, poll_config, texts, wait_until};
use logtrail_core::{MemoryOffsetStore, TailConfig};
use logtrail_tail::Tailer;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn rotate_by_rename(config: TailConfig) {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let log = dir.join("log.txt");
    let rotated = dir.join("log.txt.1");
    fs::write(&log, b"").unwrap();

    let tailer = Tailer::with_store(config, Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();

    append(&log, b"alpha\n");
    let alpha = next_line(&folder);
    assert_eq!(alpha.text(), "alpha");
    assert_eq!(alpha.line_number, 1);

    fs::rename(&log, &rotated).unwrap();
    fs::write(&log, b"beta\n").unwrap();

    let beta = next_line(&folder);
    assert_eq!(beta.text(), "beta");
    assert_eq!(beta.line_number, 1);
    assert_ne!(beta.source.key, alpha.source.key);
    assert!(folder.poll(Duration::from_millis(200)).unwrap().is_none());

    assert!(wait_until(|| {
        let paths: Vec<_> = folder
            .list_content_info(false)
            .into_iter()
            .map(|info| info.current_path)
            .collect();
        paths == vec![log.clone(), rotated.clone()]
    }));
    let infos = folder.list_content_info(true);
    assert_ne!(infos[0].logical_id, infos[1].logical_id);
    assert_eq!(infos[1].original_path, log);
    assert_eq!(infos[1].byte_offset, 6);
}

#[test]
fn test_log_txt_rotation_native() {
    rotate_by_rename(config());
}

#[test]
fn test_log_txt_rotation_poll() {
    rotate_by_rename(poll_config());
}

#[test]
fn test_delete_and_recreate_starts_new_identity() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let log = dir.join("app.log");
    fs::write(&log, b"old1\nold2\n").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();
    let old = collect_lines(&folder, 2);
    assert_eq!(texts(&old), vec!["old1", "old2"]);

    fs::remove_file(&log).unwrap();
    fs::write(&log, b"new1\n").unwrap();
    append(&log, b"new2\n");

    let new = collect_lines(&folder, 2);
    assert_eq!(texts(&new), vec!["new1", "new2"]);
    assert_eq!(new[0].line_number, 1);
    assert_eq!(new[0].offset, 0);
    assert!(folder.poll(Duration::from_millis(200)).unwrap().is_none());
    assert!(wait_until(|| folder.len() == 1));
}

#[test]
fn test_unread_file_replaced_yields_only_successor() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let log = dir.join("app.log");
    fs::write(&log, b"old1\n").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();

    // Nothing has been read, so the old file was never opened
    fs::remove_file(&log).unwrap();
    fs::write(&log, b"new1\n").unwrap();

    let mut lines = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_millis(800);
    while std::time::Instant::now() < deadline {
        if let Ok(Some(line)) = folder.poll(Duration::from_millis(50)) {
            lines.push(line);
        }
    }
    assert_eq!(texts(&lines), vec!["new1"]);
    assert_eq!(lines[0].line_number, 1);
    assert!(wait_until(|| folder.len() == 1));
}

#[test]
fn test_deleted_file_drains_before_ending() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doomed.log");
    fs::write(&path, b"first\n").unwrap();

    let tailer = Tailer::with_store(config(), Arc::new(MemoryOffsetStore::new()));
    let stream = tailer.tail_file(&path).unwrap();
    assert_eq!(next_line(&stream).text(), "first");

    append(&path, b"second\nthird");
    fs::remove_file(&path).unwrap();

    let rest: Vec<String> = stream
        .lines()
        .map(|l| l.unwrap().text().into_owned())
        .collect();
    assert_eq!(rest, vec!["second", "third"]);
    assert!(stream.is_ended());
}

#[test]
fn test_new_file_in_folder_read_from_start() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    fs::write(dir.join("existing.log"), b"before\n").unwrap();

    let mut config = config();
    config.reader.start = logtrail_core::config::StartPosition::End;
    let tailer = Tailer::with_store(config, Arc::new(MemoryOffsetStore::new()));
    let folder = tailer.tail_folder(&dir).unwrap();

    fs::write(dir.join("fresh.log"), b"hello\n").unwrap();
    let line = next_line(&folder);
    assert_eq!(line.text(), "hello");
    assert_eq!(line.line_number, 1);

    append(&dir.join("existing.log"), b"after\n");
    assert_eq!(next_line(&folder).text(), "after");
}
