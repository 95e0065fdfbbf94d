//! Checkpoint ordering and failure scenarios.

use parking_lot::{Condvar, Mutex};
use segmeta_core::{
    AddressInfo, ContextManager, CoreError, CtxSection, InlineScheduler, SegmentId, SegmentState,
    StripeId, VirtualBlockAddr, VirtualBlocks,
};
use segmeta_store::{FlushCompletion, InMemoryStore, MetaStore, StoreError, StoreResult, StoredSection};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn create_manager(store: Arc<dyn MetaStore>) -> ContextManager {
    ContextManager::new(
        AddressInfo::new(16, 4, 8),
        store,
        Arc::new(InlineScheduler),
    )
}

fn blks(stripe: u32, offset: u32, count: u32) -> VirtualBlocks {
    VirtualBlocks::new(VirtualBlockAddr::new(StripeId::new(stripe), offset), count)
}

/// A store whose segment/allocator completions wait, on their own
/// threads, until the rebuild flush has completed.
///
/// Models a metadata backend where the rebuild write is slow to be
/// issued yet must still gate the umbrella: the other completions
/// cannot unblock before it reports.
#[derive(Default)]
struct RebuildGatedStore {
    inner: InMemoryStore,
    rebuild_flushed: Arc<(Mutex<bool>, Condvar)>,
}

impl MetaStore for RebuildGatedStore {
    fn write_section(
        &self,
        section: &str,
        version: u64,
        payload: &[u8],
        completion: FlushCompletion,
    ) {
        self.inner
            .write_section(section, version, payload, Box::new(|r| r.unwrap()));

        let gate = Arc::clone(&self.rebuild_flushed);
        if section == "rebuild_ctx" {
            // Simulate a slow rebuild write, completing well after the
            // other sections have finished theirs.
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                completion(Ok(()));
                let (flushed, cvar) = &*gate;
                *flushed.lock() = true;
                cvar.notify_all();
            });
        } else {
            // Segment/allocator complete only after observing the
            // rebuild completion.
            thread::spawn(move || {
                let (flushed, cvar) = &*gate;
                let mut done = flushed.lock();
                while !*done {
                    cvar.wait(&mut done);
                }
                drop(done);
                completion(Ok(()));
            });
        }
    }

    fn read_section(&self, section: &str) -> StoreResult<Option<StoredSection>> {
        self.inner.read_section(section)
    }
}

#[test]
fn umbrella_fires_after_rebuild_completion() {
    let store = Arc::new(RebuildGatedStore::default());
    let manager = create_manager(store.clone());

    let rebuild_seen_at_callback = Arc::new(AtomicBool::new(false));
    let fired = Arc::new(AtomicUsize::new(0));

    let gate = Arc::clone(&store.rebuild_flushed);
    let seen = Arc::clone(&rebuild_seen_at_callback);
    let counter = Arc::clone(&fired);
    manager
        .flush_contexts(
            Box::new(move |status| {
                status.unwrap();
                seen.store(*gate.0.lock(), Ordering::SeqCst);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .unwrap();

    // Wait for the whole cycle to drain.
    for _ in 0..200 {
        if fired.load(Ordering::SeqCst) == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(fired.load(Ordering::SeqCst), 1, "umbrella never fired");
    assert!(
        rebuild_seen_at_callback.load(Ordering::SeqCst),
        "umbrella fired before the rebuild flush completed"
    );
    for section in CtxSection::ALL {
        assert_eq!(manager.stored_context_version(section).as_u64(), 1);
    }
}

/// A store that fails every write after an initial healthy period.
struct FailingStore {
    inner: InMemoryStore,
    failing: AtomicBool,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            failing: AtomicBool::new(false),
        }
    }

    fn start_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl MetaStore for FailingStore {
    fn write_section(
        &self,
        section: &str,
        version: u64,
        payload: &[u8],
        completion: FlushCompletion,
    ) {
        if self.failing.load(Ordering::SeqCst) {
            completion(Err(StoreError::Io(std::io::Error::other("device gone"))));
        } else {
            self.inner.write_section(section, version, payload, completion);
        }
    }

    fn read_section(&self, section: &str) -> StoreResult<Option<StoredSection>> {
        self.inner.read_section(section)
    }
}

#[test]
fn failed_checkpoint_leaves_previous_recoverable() {
    let store = Arc::new(FailingStore::new());
    let manager = create_manager(store.clone());

    // Committed checkpoint: segment 0 sealed.
    for stripe in 0..4 {
        manager.validate_blks(blks(stripe, 0, 16));
        manager.update_occupied_stripe_count(StripeId::new(stripe));
    }
    manager.flush_contexts_sync(None).unwrap();

    // The device dies; the next checkpoint is not committed.
    store.start_failing();
    manager.invalidate_blks(blks(0, 0, 16), false);
    let status = manager.flush_contexts_sync(None);
    assert!(matches!(status, Err(CoreError::Store(_))));

    // Recovery still sees the previous committed checkpoint.
    let recovered = create_manager(store);
    assert!(recovered.load().unwrap());
    assert_eq!(
        recovered.segment_state(SegmentId::new(0)),
        SegmentState::Ssd
    );
    assert_eq!(recovered.valid_block_count(SegmentId::new(0)), 64);
    assert_eq!(
        recovered.stored_context_version(CtxSection::Segment).as_u64(),
        1
    );
}

#[test]
fn reentrant_checkpoint_is_rejected_not_interleaved() {
    // A store that never completes, keeping the first cycle in flight.
    struct StuckStore;
    impl MetaStore for StuckStore {
        fn write_section(&self, _: &str, _: u64, _: &[u8], completion: FlushCompletion) {
            // Hold the completion forever.
            std::mem::forget(completion);
        }
        fn read_section(&self, _: &str) -> StoreResult<Option<StoredSection>> {
            Ok(None)
        }
    }

    let manager = create_manager(Arc::new(StuckStore));
    manager.flush_contexts(Box::new(|_| {}), None).unwrap();

    let second = manager.flush_contexts(Box::new(|_| {}), None);
    assert!(matches!(second, Err(CoreError::FlushInProgress)));

    let rebuild_only = manager.flush_rebuild_context(Box::new(|_| {}));
    assert!(matches!(rebuild_only, Err(CoreError::FlushInProgress)));
}

#[test]
fn back_to_back_checkpoints_keep_ordering() {
    // Issue checkpoints back-to-back with no scheduling delay; every
    // cycle must uphold the ordering contract and version monotonicity.
    let store = Arc::new(InMemoryStore::new());
    let manager = create_manager(store.clone());

    for round in 1..=10u64 {
        manager.flush_contexts_sync(None).unwrap();
        for section in CtxSection::ALL {
            assert_eq!(manager.stored_context_version(section).as_u64(), round);
            assert_eq!(store.latest_version(section.name()), Some(round));
        }
    }
}
