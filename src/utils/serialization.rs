// src/utils/serialization.rs
//! Serialization utilities for the directory service.
//!
//! Provides JSON decoding plus whole-file reads and writes used by the
//! credential cache and the embedded store. Writes go to a sibling temporary
//! file that is renamed into place, so a reader sees either the previous
//! contents or the new contents, never a partial file.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Deserializes a value from a JSON string.
pub fn deserialize<'a, T: serde::Deserialize<'a>>(data: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}

/// Reads and decodes a JSON file.
///
/// # Returns
/// - `Ok(None)` if the file does not exist
/// - `Ok(Some(value))` on success
/// - `Err` if the file cannot be read or does not decode
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    deserialize(&data)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encodes `data` as JSON and atomically replaces the file at `path`.
///
/// Parent directories are created as needed. When `private` is set the file
/// is created readable by the owner only (unix).
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T, private: bool) -> io::Result<()> {
    let encoded = serde_json::to_vec_pretty(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &encoded, private)
}

/// Atomically replaces the file at `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temporary_path(path);
    let result = write_file(&tmp, contents, private).and_then(|_| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_file(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<Sample> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn atomic_write_replaces_contents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");

        write_json_atomic(&path, &Sample { name: "a".into(), count: 1 }, false).unwrap();
        write_json_atomic(&path, &Sample { name: "b".into(), count: 2 }, true).unwrap();

        let value: Sample = read_json(&path).unwrap().unwrap();
        assert_eq!(value, Sample { name: "b".into(), count: 2 });
        assert!(!temporary_path(&path).exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(read_json::<Sample>(&path).is_err());
    }
}
