//! Record store for durable continuity data.
//!
//! Each record is a whole JSON file under a configured directory. Writes go
//! to a temp file first and are renamed into place, so a crash mid-write
//! leaves the previous record intact rather than a truncated file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from record store operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A directory of named JSON records with atomic whole-file replacement.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Open a record store at the given directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Point at a directory without creating it. Lets tests simulate a
    /// broken storage location.
    #[cfg(test)]
    pub(crate) fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The directory this store writes under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the named record wholesale.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(value)?;
        let tmp = self.dir.join(format!("{name}.tmp"));
        let path = self.dir.join(name);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load the named record, or `None` if it has never been written.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u32>,
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let sample = Sample {
            name: "plots".to_string(),
            values: vec![1, 2, 3],
        };
        store.save("plots.json", &sample).unwrap();

        let loaded: Sample = store.load("plots.json").unwrap().unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_load_missing_record() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let loaded: Option<Sample> = store.load("absent.json").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_replaces_wholesale() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let first = Sample {
            name: "counter".to_string(),
            values: (0..100).collect(),
        };
        store.save("counter.json", &first).unwrap();

        let second = Sample {
            name: "counter".to_string(),
            values: vec![7],
        };
        store.save("counter.json", &second).unwrap();

        let loaded: Sample = store.load("counter.json").unwrap().unwrap();
        assert_eq!(loaded, second);
        // No temp file left behind after a successful rename.
        assert!(!dir.path().join("counter.json.tmp").exists());
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("memory").join("db");
        let store = RecordStore::open(&nested).unwrap();
        assert!(nested.exists());
        assert_eq!(store.dir(), nested);
    }
}
