//! Test fixtures and core assembly helpers.
//!
//! Provides convenience functions for setting up a metadata core over an
//! in-memory or file-backed store, with a small geometry that keeps
//! scenarios readable.

use segmeta_core::{
    AddressInfo, ContextManager, InlineScheduler, StripeId, VirtualBlockAddr, VirtualBlocks,
};
use segmeta_store::{FileStore, InMemoryStore, MetaStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Default test geometry: 16 blocks per stripe, 4 stripes per segment,
/// 8 segments.
#[must_use]
pub fn small_geometry() -> AddressInfo {
    AddressInfo::new(16, 4, 8)
}

/// A metadata core with automatic cleanup.
pub struct TestCore {
    /// The context manager.
    pub manager: ContextManager,
    /// The in-memory store, when memory-backed.
    pub store: Option<Arc<InMemoryStore>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestCore {
    /// Creates a memory-backed core with the default test geometry.
    #[must_use]
    pub fn memory() -> Self {
        Self::memory_with(small_geometry())
    }

    /// Creates a memory-backed core with a custom geometry.
    #[must_use]
    pub fn memory_with(addr: AddressInfo) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let manager = ContextManager::new(
            addr,
            Arc::clone(&store) as Arc<dyn MetaStore>,
            Arc::new(InlineScheduler),
        );
        Self {
            manager,
            store: Some(store),
            _temp_dir: None,
        }
    }

    /// Creates a file-backed core with the default test geometry.
    ///
    /// # Panics
    ///
    /// Panics if the temporary store cannot be created.
    #[must_use]
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("failed to open file store");
        let manager = ContextManager::new(
            small_geometry(),
            Arc::new(store),
            Arc::new(InlineScheduler),
        );
        Self {
            manager,
            store: None,
            _temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestCore {
    type Target = ContextManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Builds a block range within one stripe.
#[must_use]
pub fn blks(stripe: u32, offset: u32, count: u32) -> VirtualBlocks {
    VirtualBlocks::new(
        VirtualBlockAddr::new(StripeId::new(stripe), offset),
        count,
    )
}

/// Writes and seals every stripe of `segment`, driving it to `Ssd`.
pub fn fill_segment(manager: &ContextManager, segment: u32) {
    let addr = manager.address_info();
    let first = segment * addr.stripes_per_segment();
    for stripe in first..first + addr.stripes_per_segment() {
        manager.validate_blks(blks(stripe, 0, addr.blks_per_stripe()));
        manager.update_occupied_stripe_count(StripeId::new(stripe));
    }
}

/// Invalidates every block of `segment`, driving it back to `Free`.
pub fn drain_segment(manager: &ContextManager, segment: u32) {
    let addr = manager.address_info();
    let first = segment * addr.stripes_per_segment();
    for stripe in first..first + addr.stripes_per_segment() {
        manager.invalidate_blks(blks(stripe, 0, addr.blks_per_stripe()), false);
    }
}
