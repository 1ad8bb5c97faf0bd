//! File-Backed Store
//!
//! One file per externalized entry under a directory. The file name is the
//! URL-encoded key plus `.entry`; its contents are:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┬─────────────┐
//! │ header len (u32) │ JSON header                  │ payload     │
//! │ little-endian    │ {key, generation, descriptor,│ (len bytes) │
//! │                  │  expires_at, len}            │             │
//! └──────────────────┴──────────────────────────────┴─────────────┘
//! ```
//!
//! Writes go to a temporary file that is renamed over the target.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{BackingStore, StoredRecord, TypeDescriptor};
use crate::error::{Error, Result, StoreOperation};

const EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "entry.tmp";

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    key: String,
    generation: u64,
    descriptor: TypeDescriptor,
    expires_at: Option<DateTime<Utc>>,
    len: usize,
}

/// Directory of `.entry` files
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "file store opened");
        Ok(Self { dir })
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", urlencoding::encode(key), EXTENSION))
    }

    fn read(&self, key: &str, operation: StoreOperation) -> Result<Option<StoredRecord>> {
        let data = match fs::read(self.path_for(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::store(key, operation, e)),
        };
        let record = Self::decode(&data).map_err(|e| Error::store(key, operation, e))?;
        if record.key != key {
            return Err(Error::store(
                key,
                operation,
                format!("file holds record for '{}'", record.key),
            ));
        }
        Ok(Some(record))
    }

    fn entry_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for item in fs::read_dir(&self.dir)? {
            let path = item?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn encode(record: &StoredRecord) -> std::result::Result<Vec<u8>, String> {
        let header = RecordHeader {
            key: record.key.clone(),
            generation: record.generation,
            descriptor: record.descriptor.clone(),
            expires_at: record.expires_at,
            len: record.len(),
        };
        let header = serde_json::to_vec(&header).map_err(|e| e.to_string())?;
        let header_len = u32::try_from(header.len()).map_err(|e| e.to_string())?;

        let mut out = Vec::with_capacity(4 + header.len() + record.len());
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&record.bytes);
        Ok(out)
    }

    fn decode(data: &[u8]) -> std::result::Result<StoredRecord, String> {
        if data.len() < 4 {
            return Err("truncated header length".into());
        }
        let header_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let body = &data[4..];
        if body.len() < header_len {
            return Err(format!(
                "truncated header: {} of {} bytes",
                body.len(),
                header_len
            ));
        }

        let header: RecordHeader =
            serde_json::from_slice(&body[..header_len]).map_err(|e| e.to_string())?;
        let payload = &body[header_len..];
        if payload.len() != header.len {
            return Err(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                header.len
            ));
        }

        Ok(StoredRecord {
            key: header.key,
            generation: header.generation,
            descriptor: header.descriptor,
            expires_at: header.expires_at,
            bytes: Bytes::copy_from_slice(payload),
        })
    }
}

impl BackingStore for FileStore {
    fn persist(&self, record: &StoredRecord) -> Result<()> {
        let data = Self::encode(record)
            .map_err(|e| Error::store(&record.key, StoreOperation::Persist, e))?;

        let path = self.path_for(&record.key);
        let temp = path.with_extension(TEMP_EXTENSION);
        fs::write(&temp, &data)
            .and_then(|_| fs::rename(&temp, &path))
            .map_err(|e| Error::store(&record.key, StoreOperation::Persist, e))?;

        debug!(key = %record.key, path = %path.display(), size = data.len(), "record persisted");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        self.read(key, StoreOperation::Load)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::store(key, StoreOperation::Delete, e)),
        }
    }

    fn delete_if(&self, key: &str, generation: u64) -> Result<bool> {
        match self.read(key, StoreOperation::Delete)? {
            Some(record) if record.generation == generation => self.delete(key),
            Some(record) => {
                debug!(
                    key,
                    generation,
                    stored = record.generation,
                    "record belongs to another generation"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn count(&self) -> Result<u64> {
        self.entry_files()
            .map(|files| files.len() as u64)
            .map_err(|e| Error::store("*", StoreOperation::Count, e))
    }

    fn clear(&self) -> Result<()> {
        let files = self
            .entry_files()
            .map_err(|e| Error::store("*", StoreOperation::Clear, e))?;
        for path in &files {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::store("*", StoreOperation::Clear, e)),
            }
        }
        debug!(removed = files.len(), "file store cleared");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn record(key: &str, payload: &[u8]) -> StoredRecord {
        StoredRecord {
            key: key.to_string(),
            generation: 1,
            descriptor: TypeDescriptor::of::<String>(),
            expires_at: Some(Utc::now()),
            bytes: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let original = record("user:42", b"payload bytes");

        store.persist(&original).unwrap();
        assert_eq!(store.load("user:42").unwrap(), Some(original));
        assert_eq!(store.count().unwrap(), 1);
        assert!(dir.path().join("user%3A42.entry").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load("nope").unwrap(), None);
        assert!(!store.delete("nope").unwrap());
    }

    #[test]
    fn test_keys_with_path_separators() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.persist(&record("../../etc/passwd", b"x")).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert!(store.load("../../etc/passwd").unwrap().is_some());
        assert!(store.delete("../../etc/passwd").unwrap());
    }

    #[test]
    fn test_persist_replaces_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.persist(&record("a", b"first")).unwrap();
        store.persist(&record("a", b"second")).unwrap();
        store.persist(&record("b", b"other")).unwrap();

        assert_eq!(store.load("a").unwrap().unwrap().bytes.as_ref(), b"second");
        assert_eq!(store.count().unwrap(), 2);

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_if_keeps_other_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let newer = StoredRecord {
            generation: 9,
            ..record("a", b"newer")
        };
        store.persist(&newer).unwrap();

        assert!(!store.delete_if("a", 1).unwrap());
        assert_eq!(store.load("a").unwrap(), Some(newer));

        assert!(store.delete_if("a", 9).unwrap());
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.delete_if("a", 9).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.entry"), [0xff, 0xff]).unwrap();

        assert_matches!(
            store.load("bad"),
            Err(Error::BackingStoreFailed {
                operation: StoreOperation::Load,
                ..
            })
        );
    }

    #[test]
    fn test_reopen_sees_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .persist(&record("kept", b"data"))
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert!(reopened.load("kept").unwrap().is_some());
    }
}
