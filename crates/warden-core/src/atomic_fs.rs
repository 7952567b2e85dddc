//! Small atomic-JSON-file helpers shared by every on-disk store in the
//! workspace (MemoryStore in `warden-memory`, the tracker tables in
//! `warden-tracker`). Writes go to a temp file in the same directory and
//! are renamed into place, so a crash never leaves a half-written file.
//!
//! Corrupted or missing files are never fatal — callers get `None` or a
//! default value plus a `tracing::warn!` instead of a propagated error.

use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

/// Read and parse a JSON file. Returns `None` if it doesn't exist or the
/// file is empty; also `None` (with a warning) if the contents don't parse.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read store file; treating as empty");
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupted store file; treating as empty");
            None
        }
    }
}

/// Read a JSON file, falling back to `T::default()` on any absence/corruption.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    read_json_opt(path).unwrap_or_default()
}

/// Atomically write `value` as JSON to `path` (write-to-temp + rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(&body)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips_through_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample { a: 7, b: "hi".into() };
        write_json_atomic(&path, &value).unwrap();
        let loaded: Sample = read_json_opt(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(read_json_opt::<Sample>(&path).is_none());
    }

    #[test]
    fn corrupted_file_is_none_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{not valid json").unwrap();
        assert!(read_json_opt::<Sample>(&path).is_none());
    }
}
