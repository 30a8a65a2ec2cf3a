//! Metadata reported by `list_content_info`

use crate::common::*;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use logtrail_tail::Tailer;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_realtime_info_reports_current_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("app.log");
    fs::write(&path, b"one\n").unwrap();

    let tailer = Tailer::new(config()).unwrap();
    let folder = tailer.tail_folder(temp_dir.path()).unwrap();
    assert_eq!(texts(&collect_lines(&folder, 1)), vec!["one"]);

    append(&path, b"two\nthree\n");
    let stamp = FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&path, stamp).unwrap();

    let infos = folder.list_content_info(true);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].length, 14);
    let expected: DateTime<Utc> = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
    assert_eq!(infos[0].last_modified, Some(expected));
    // Nothing past the first line has been delivered yet
    assert_eq!(infos[0].byte_offset, 4);

    folder.close();
    tailer.close();
}

#[test]
fn test_info_serializes_for_reporting() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().canonicalize().unwrap();
    let path = dir.join("b.log");
    fs::write(&path, b"first\n").unwrap();

    let tailer = Tailer::new(config()).unwrap();
    let folder = tailer.tail_folder(&dir).unwrap();
    next_line(&folder);

    let infos = folder.list_content_info(false);
    let json = serde_json::to_value(&infos).unwrap();
    let entry = &json[0];
    assert_eq!(entry["length"], 6);
    assert_eq!(entry["byte_offset"], 6);
    assert_eq!(entry["current_path"], entry["original_path"]);
    assert_eq!(entry["logical_id"], infos[0].logical_id.to_string());

    folder.close();
    tailer.close();
}
