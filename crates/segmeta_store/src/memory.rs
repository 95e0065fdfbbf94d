//! In-memory metadata store for testing.

use crate::store::{FlushCompletion, MetaStore, StoredSection};
use crate::StoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory metadata store.
///
/// Keeps the two most recent versions of every section, mirroring the slot
/// behavior of [`super::FileStore`], and completes every write inline on
/// the calling thread. Suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral arrays that don't need metadata persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sections: RwLock<HashMap<String, [Option<(u64, Vec<u8>)>; 2]>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest stored version of a section, if any.
    ///
    /// Useful for assertions in tests.
    #[must_use]
    pub fn latest_version(&self, section: &str) -> Option<u64> {
        let sections = self.sections.read();
        let slots = sections.get(section)?;
        slots
            .iter()
            .flatten()
            .map(|&(version, _)| version)
            .max()
    }

    /// Returns the number of sections ever written.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.read().len()
    }
}

impl MetaStore for InMemoryStore {
    fn write_section(
        &self,
        section: &str,
        version: u64,
        payload: &[u8],
        completion: FlushCompletion,
    ) {
        {
            let mut sections = self.sections.write();
            let slots = sections.entry(section.to_string()).or_default();
            slots[(version % 2) as usize] = Some((version, payload.to_vec()));
        }
        completion(Ok(()));
    }

    fn read_section(&self, section: &str) -> StoreResult<Option<StoredSection>> {
        let sections = self.sections.read();
        let Some(slots) = sections.get(section) else {
            return Ok(None);
        };

        let latest = slots
            .iter()
            .flatten()
            .max_by_key(|&&(version, _)| version)
            .map(|(version, payload)| StoredSection {
                version: *version,
                payload: payload.clone(),
            });

        Ok(latest)
    }
}
