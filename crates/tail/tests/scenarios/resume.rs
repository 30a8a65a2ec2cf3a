//! Positions persisted across tailer restarts

use crate::common::{collect_lines, config, next_line, texts, wait_until};
use logtrail_core::config::StartPosition;
use logtrail_tail::Tailer;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_renamed_file_resumes_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let logs = temp_dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    let path = logs.join("service.log");
    let renamed = logs.join("service.log.1");
    fs::write(&path, b"one\ntwo\nthree\n").unwrap();

    let mut config = config();
    config.offsets.path = Some(temp_dir.path().join("offsets"));

    {
        let tailer = Tailer::new(config.clone()).unwrap();
        let stream = tailer.tail_file(&path).unwrap();
        assert_eq!(texts(&collect_lines(&stream, 2)), vec!["one", "two"]);
        // "three" is already buffered; the rename must end the stream first
        fs::rename(&path, &renamed).unwrap();
        assert!(wait_until(|| stream.is_ended()));
        stream.close();
        tailer.close();
    }

    config.reader.start = StartPosition::End;
    let mut reopened = None;
    assert!(wait_until(|| {
        reopened = Tailer::new(config.clone()).ok();
        reopened.is_some()
    }));
    let tailer = reopened.unwrap();
    let stream = tailer.tail_file(&renamed).unwrap();
    let line = next_line(&stream);
    assert_eq!(line.text(), "three");
    assert_eq!(line.line_number, 3);
}

#[test]
fn test_deleted_file_forgets_position() {
    let temp_dir = TempDir::new().unwrap();
    let logs = temp_dir.path().join("logs");
    fs::create_dir(&logs).unwrap();
    let path = logs.join("gone.log");
    fs::write(&path, b"x\n").unwrap();

    let mut config = config();
    config.offsets.path = Some(temp_dir.path().join("offsets"));
    let tailer = Tailer::new(config).unwrap();
    let stream = tailer.tail_file(&path).unwrap();
    let key = next_line(&stream).source.key.unwrap();
    tailer.store().save(&key, logtrail_core::ReaderPosition::new(2, 1)).unwrap();

    fs::remove_file(&path).unwrap();
    assert!(wait_until(|| tailer.store().load(&key).unwrap().is_none()));
    assert_eq!(stream.lines().count(), 0);
}
