//! File-based metadata store for persistent storage.

use crate::error::{StoreError, StoreResult};
use crate::slot;
use crate::store::{FlushCompletion, MetaStore, StoredSection};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lock file name within the store directory.
const LOCK_FILE: &str = "LOCK";

/// A file-based metadata store.
///
/// Each section is kept as a pair of slot files (`<section>.a` and
/// `<section>.b`). Writes alternate between the slots by version parity,
/// so the slot holding the latest intact version is never touched by a new
/// write. A crash mid-write leaves at worst one torn slot, which is
/// detected by its envelope checksum and skipped at read time.
///
/// ```text
/// <store_path>/
/// ├─ LOCK             # Advisory lock for single-process access
/// ├─ segment_ctx.a
/// ├─ segment_ctx.b
/// └─ ...
/// ```
///
/// # Durability
///
/// Every slot write is followed by `File::sync_all()` before its
/// completion fires.
///
/// # Thread Safety
///
/// This store is thread-safe. Concurrent writes to *different* sections do
/// not serialize against each other beyond OS file I/O.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a file store at the given directory.
    ///
    /// Acquires an exclusive advisory lock on the directory; only one
    /// process may hold a store open at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created or accessed
    /// - Another process holds the lock (returns [`StoreError::Locked`])
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_path(&self, section: &str, version: u64) -> StoreResult<PathBuf> {
        Self::check_section_name(section)?;
        let suffix = if version % 2 == 0 { "a" } else { "b" };
        Ok(self.path.join(format!("{section}.{suffix}")))
    }

    fn check_section_name(section: &str) -> StoreResult<()> {
        let valid = !section.is_empty()
            && section
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(StoreError::InvalidSectionName(section.to_string()))
        }
    }

    fn write_slot(&self, section: &str, version: u64, payload: &[u8]) -> StoreResult<()> {
        let slot_path = self.slot_path(section, version)?;
        let encoded = slot::encode(version, payload);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&slot_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        Ok(())
    }

    fn read_slot(path: &Path) -> Option<(u64, Vec<u8>)> {
        let data = fs::read(path).ok()?;
        slot::decode(&data).ok()
    }
}

impl MetaStore for FileStore {
    fn write_section(
        &self,
        section: &str,
        version: u64,
        payload: &[u8],
        completion: FlushCompletion,
    ) {
        completion(self.write_slot(section, version, payload));
    }

    fn read_section(&self, section: &str) -> StoreResult<Option<StoredSection>> {
        Self::check_section_name(section)?;

        let slot_a = Self::read_slot(&self.path.join(format!("{section}.a")));
        let slot_b = Self::read_slot(&self.path.join(format!("{section}.b")));

        let latest = [slot_a, slot_b]
            .into_iter()
            .flatten()
            .max_by_key(|&(version, _)| version)
            .map(|(version, payload)| StoredSection { version, payload });

        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaStore;
    use tempfile::TempDir;

    fn write(store: &FileStore, section: &str, version: u64, payload: &[u8]) {
        store.write_section(section, version, payload, Box::new(|r| r.unwrap()));
    }

    #[test]
    fn open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta");
        let store = FileStore::open(&path).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn second_open_rejected_while_locked() {
        let dir = TempDir::new().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let _store = FileStore::open(dir.path()).unwrap();
        }
        assert!(FileStore::open(dir.path()).is_ok());
    }

    #[test]
    fn write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        write(&store, "segment_ctx", 1, b"payload");

        let stored = store.read_section("segment_ctx").unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.payload, b"payload");
    }

    #[test]
    fn read_unwritten_section() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.read_section("segment_ctx").unwrap().is_none());
    }

    #[test]
    fn versions_alternate_slots() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        write(&store, "rebuild_ctx", 1, b"v1");
        write(&store, "rebuild_ctx", 2, b"v2");

        assert!(dir.path().join("rebuild_ctx.a").exists());
        assert!(dir.path().join("rebuild_ctx.b").exists());

        let stored = store.read_section("rebuild_ctx").unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.payload, b"v2");
    }

    #[test]
    fn corrupt_latest_slot_falls_back_to_previous() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        write(&store, "segment_ctx", 1, b"v1");
        write(&store, "segment_ctx", 2, b"v2");

        // Simulate a torn write of the latest slot (version 2 -> slot a).
        fs::write(dir.path().join("segment_ctx.a"), b"garbage").unwrap();

        let stored = store.read_section("segment_ctx").unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.payload, b"v1");
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            write(&store, "allocator_ctx", 3, b"bitmap");
        }

        let store = FileStore::open(dir.path()).unwrap();
        let stored = store.read_section("allocator_ctx").unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.payload, b"bitmap");
    }

    #[test]
    fn invalid_section_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let result = store.read_section("../escape");
        assert!(matches!(result, Err(StoreError::InvalidSectionName(_))));
    }

    #[test]
    fn write_failure_reported_through_completion() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        store.write_section("bad/name", 1, b"x", Box::new(move |r| tx.send(r).unwrap()));

        let result = rx.recv().unwrap();
        assert!(matches!(result, Err(StoreError::InvalidSectionName(_))));
    }
}
