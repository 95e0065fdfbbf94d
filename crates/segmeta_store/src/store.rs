//! Metadata store trait definition.

use crate::error::StoreResult;

/// Completion callback for an asynchronous section write.
///
/// Invoked exactly once with the durability outcome of the write.
pub type FlushCompletion = Box<dyn FnOnce(StoreResult<()>) + Send>;

/// A section payload as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSection {
    /// Version stamped when the section was written.
    pub version: u64,
    /// Section payload bytes.
    pub payload: Vec<u8>,
}

/// A versioned section store for allocator metadata.
///
/// Stores hold named sections, each written as a whole under a caller
/// supplied version. Payloads are opaque - the metadata core owns all
/// format interpretation.
///
/// # Invariants
///
/// - `write_section` invokes the completion exactly once, after the payload
///   is durable or the write has failed
/// - A failed or torn write leaves the previously stored version readable;
///   writes never overwrite the latest intact copy in place
/// - `read_section` returns the highest-version intact copy
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Asynchrony
///
/// The completion may fire on the calling thread before `write_section`
/// returns (synchronous implementations) or later from another thread.
/// Callers must not assume either.
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait MetaStore: Send + Sync {
    /// Writes `payload` as the new version of `section`.
    ///
    /// The outcome is reported through `completion`; this call itself only
    /// issues the write and never blocks on durability.
    fn write_section(
        &self,
        section: &str,
        version: u64,
        payload: &[u8],
        completion: FlushCompletion,
    );

    /// Reads the highest-version intact copy of `section`.
    ///
    /// Returns `None` if the section has never been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store itself cannot be accessed. A single
    /// corrupt copy is not an error while an older intact copy survives.
    fn read_section(&self, section: &str) -> StoreResult<Option<StoredSection>>;
}
