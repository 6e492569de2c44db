//! Crash-safe file primitives: write-temp-then-rename publication and
//! append-only line logs. Readers never observe partial JSON.

use crate::error::{ForemanError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Atomically publish `contents` at `path` via a temp-file rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        ForemanError::StoreError(format!("record path has no parent: {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let mut tmp_name = path
        .file_name()
        .map_or_else(|| "record".to_string(), |n| n.to_string_lossy().to_string());
    tmp_name.push_str(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Append one JSON line to an append-only log. Single writer per file.
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        ForemanError::StoreError(format!("log path has no parent: {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let line = serde_json::to_string(value)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Read every parseable JSON line from a log. A torn final line (crash
/// mid-append) is skipped rather than poisoning the whole log.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{append_json_line, read_json, read_json_if_exists, read_json_lines, write_json};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Rec {
        name: String,
        n: u32,
    }

    #[test]
    fn json_write_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/rec.json");
        let rec = Rec {
            name: "a".to_string(),
            n: 7,
        };
        write_json(&path, &rec).expect("write");
        let back: Rec = read_json(&path).expect("read");
        assert_eq!(back, rec);
        assert!(!path.with_file_name("rec.json.tmp").exists());
    }

    #[test]
    fn missing_files_read_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let absent: Option<Rec> =
            read_json_if_exists(&dir.path().join("nope.json")).expect("read");
        assert!(absent.is_none());
    }

    #[test]
    fn log_appends_preserve_order_and_skip_torn_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        for n in 0..3 {
            append_json_line(
                &path,
                &Rec {
                    name: "x".to_string(),
                    n,
                },
            )
            .expect("append");
        }
        // Simulate a crash mid-append.
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"{\"name\":\"torn").expect("write");

        let records: Vec<Rec> = read_json_lines(&path).expect("read");
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.n).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
