//! Dependency-ordered context flushing.
//!
//! A checkpoint persists the segment, allocator, and rebuild contexts.
//! The three flushes are issued together and complete independently; the
//! umbrella callback fires exactly once, only after **all** of them have
//! completed - in particular, the rebuild-context completion must have
//! been recorded before the umbrella may report. Recovery trusts the
//! rebuild context to know which segments were mid-rebuild, so segment or
//! allocator state must never become visible as committed while rebuild
//! bookkeeping is stale.

use crate::context::allocator::AllocatorCtx;
use crate::context::header::{CtxHeader, CtxSection};
use crate::error::{CoreError, CoreResult};
use crate::event::EventScheduler;
use crate::rebuild::RebuildCtx;
use crate::segment::SegmentCtx;
use crate::types::ContextVersion;
use parking_lot::{Condvar, Mutex};
use segmeta_store::MetaStore;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Umbrella completion callback for a checkpoint.
///
/// Receives the worst-case status across all constituent flushes.
pub type CheckpointCallback = Box<dyn FnOnce(CoreResult<()>) + Send>;

/// Last durably stored version per section.
#[derive(Debug, Default)]
struct StoredVersions([AtomicU64; 3]);

impl StoredVersions {
    fn record(&self, section: CtxSection, version: ContextVersion) {
        self.0[section.index()].store(version.as_u64(), Ordering::SeqCst);
    }

    fn get(&self, section: CtxSection) -> ContextVersion {
        ContextVersion::new(self.0[section.index()].load(Ordering::SeqCst))
    }
}

/// How the umbrella callback is delivered once the group completes.
enum Dispatch {
    /// Invoke on whichever thread completes last (synchronous mode).
    Inline,
    /// Enqueue on the event scheduler (asynchronous mode).
    Scheduled(Arc<dyn EventScheduler>),
}

/// Aggregates the completions of one flush cycle.
///
/// Fires its callback exactly once, after every constituent flush has
/// reported, carrying the first failure if any. Clears the issuing
/// manager's in-progress gate *before* the callback runs, so the
/// callback may start the next cycle.
struct FlushGroup {
    remaining: AtomicUsize,
    rebuild_flushed: AtomicBool,
    first_error: Mutex<Option<CoreError>>,
    callback: Mutex<Option<CheckpointCallback>>,
    dispatch: Dispatch,
    in_progress: Arc<AtomicBool>,
}

impl FlushGroup {
    fn new(
        count: usize,
        callback: CheckpointCallback,
        dispatch: Dispatch,
        in_progress: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            rebuild_flushed: AtomicBool::new(false),
            first_error: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
            dispatch,
            in_progress,
        })
    }

    fn complete(&self, section: CtxSection, result: CoreResult<()>) {
        if let Err(error) = result {
            tracing::warn!(%section, %error, "context flush failed");
            let mut first = self.first_error.lock();
            if first.is_none() {
                *first = Some(error);
            }
        }
        if section == CtxSection::Rebuild {
            self.rebuild_flushed.store(true, Ordering::SeqCst);
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        // Last constituent: the rebuild completion must already be on
        // record before the umbrella reports.
        debug_assert!(self.rebuild_flushed.load(Ordering::SeqCst));

        let status = match self.first_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        self.in_progress.store(false, Ordering::Release);

        let Some(callback) = self.callback.lock().take() else {
            return;
        };
        match &self.dispatch {
            Dispatch::Inline => callback(status),
            Dispatch::Scheduled(scheduler) => {
                scheduler.enqueue(Box::new(move || callback(status)));
            }
        }
    }
}

/// Drives persistence of the metadata contexts.
///
/// Owns the flush cycle: version stamping, header wrapping, issuing the
/// section writes, and aggregating their completions. At most one flush
/// cycle is in flight; a second request while one is outstanding is
/// rejected with [`CoreError::FlushInProgress`], never interleaved.
pub struct ContextIoManager {
    store: Arc<dyn MetaStore>,
    scheduler: Arc<dyn EventScheduler>,
    flush_in_progress: Arc<AtomicBool>,
    stored: Arc<StoredVersions>,
}

impl ContextIoManager {
    /// Creates a context I/O manager over a metadata store.
    pub fn new(store: Arc<dyn MetaStore>, scheduler: Arc<dyn EventScheduler>) -> Self {
        Self {
            store,
            scheduler,
            flush_in_progress: Arc::new(AtomicBool::new(false)),
            stored: Arc::new(StoredVersions::default()),
        }
    }

    /// Flushes all three contexts asynchronously.
    ///
    /// Returns as soon as the flushes are issued. `callback` is enqueued
    /// on the event scheduler after every constituent flush completes,
    /// with the worst-case status. `external_buffer`, when given,
    /// substitutes a caller-captured segment-context image for a live
    /// capture.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushInProgress`] if a flush cycle is
    /// already in flight (the request is rejected, not queued).
    pub fn flush_contexts(
        &self,
        segment: &SegmentCtx,
        allocator: &AllocatorCtx,
        rebuild: &RebuildCtx,
        callback: CheckpointCallback,
        external_buffer: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        self.issue_flushes(
            segment,
            allocator,
            rebuild,
            callback,
            Dispatch::Scheduled(Arc::clone(&self.scheduler)),
            external_buffer,
        )
    }

    /// Flushes all three contexts, blocking until the umbrella completes.
    ///
    /// The block is bounded by the store's I/O latency; completion is
    /// signaled through a condvar, never polled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushInProgress`] if a flush cycle is
    /// already in flight, or the worst-case constituent status.
    pub fn flush_contexts_sync(
        &self,
        segment: &SegmentCtx,
        allocator: &AllocatorCtx,
        rebuild: &RebuildCtx,
        external_buffer: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        let signal = Arc::new((Mutex::new(None::<CoreResult<()>>), Condvar::new()));
        let publish = Arc::clone(&signal);

        self.issue_flushes(
            segment,
            allocator,
            rebuild,
            Box::new(move |status| {
                let (slot, cvar) = &*publish;
                *slot.lock() = Some(status);
                cvar.notify_one();
            }),
            Dispatch::Inline,
            external_buffer,
        )?;

        let (slot, cvar) = &*signal;
        let mut guard = slot.lock();
        loop {
            if let Some(status) = guard.take() {
                return status;
            }
            cvar.wait(&mut guard);
        }
    }

    /// Flushes only the rebuild context.
    ///
    /// Used when the target list changes outside a full checkpoint.
    /// Shares the in-flight gate with `flush_contexts`, so a rebuild
    /// flush never races a checkpoint's own rebuild-section write.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushInProgress`] if a flush cycle is
    /// already in flight.
    pub fn flush_rebuild_context(
        &self,
        rebuild: &RebuildCtx,
        callback: CheckpointCallback,
    ) -> CoreResult<()> {
        if self.flush_in_progress.swap(true, Ordering::AcqRel) {
            return Err(CoreError::FlushInProgress);
        }

        let group = FlushGroup::new(
            1,
            callback,
            Dispatch::Scheduled(Arc::clone(&self.scheduler)),
            Arc::clone(&self.flush_in_progress),
        );
        let version = rebuild.next_version();
        let payload = CtxHeader::encode(CtxSection::Rebuild, version, &rebuild.pack());
        self.issue_one(CtxSection::Rebuild, version, payload, &group);
        Ok(())
    }

    /// Last durably stored version of a section.
    #[must_use]
    pub fn stored_context_version(&self, section: CtxSection) -> ContextVersion {
        self.stored.get(section)
    }

    /// Reads and validates a section image from the store.
    ///
    /// Returns `None` if the section has never been persisted. On
    /// success, records the stored version so subsequent
    /// [`Self::stored_context_version`] calls reflect it.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure, a malformed image, or an image
    /// belonging to a different section.
    pub fn load_section(
        &self,
        section: CtxSection,
    ) -> CoreResult<Option<(ContextVersion, Vec<u8>)>> {
        let Some(stored) = self.store.read_section(section.name())? else {
            return Ok(None);
        };
        let (header, body) = CtxHeader::decode(&stored.payload)?;
        if header.section != section {
            return Err(CoreError::invalid_format(format!(
                "section {} holds an image of {}",
                section, header.section
            )));
        }
        self.stored.record(section, header.version);
        Ok(Some((header.version, body.to_vec())))
    }

    fn issue_flushes(
        &self,
        segment: &SegmentCtx,
        allocator: &AllocatorCtx,
        rebuild: &RebuildCtx,
        callback: CheckpointCallback,
        dispatch: Dispatch,
        external_buffer: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        if self.flush_in_progress.swap(true, Ordering::AcqRel) {
            return Err(CoreError::FlushInProgress);
        }

        // Stamp versions and capture payloads before issuing anything,
        // so a fast completion cannot observe a half-built cycle.
        let segment_version = segment.next_version();
        let segment_body = external_buffer.unwrap_or_else(|| segment.pack());
        let allocator_version = allocator.next_version();
        let rebuild_version = rebuild.next_version();

        let flushes = [
            (
                CtxSection::Segment,
                segment_version,
                CtxHeader::encode(CtxSection::Segment, segment_version, &segment_body),
            ),
            (
                CtxSection::Allocator,
                allocator_version,
                CtxHeader::encode(CtxSection::Allocator, allocator_version, &allocator.pack()),
            ),
            (
                CtxSection::Rebuild,
                rebuild_version,
                CtxHeader::encode(CtxSection::Rebuild, rebuild_version, &rebuild.pack()),
            ),
        ];

        tracing::debug!(
            segment = segment_version.as_u64(),
            allocator = allocator_version.as_u64(),
            rebuild = rebuild_version.as_u64(),
            "checkpoint flush issued"
        );

        let group = FlushGroup::new(
            flushes.len(),
            callback,
            dispatch,
            Arc::clone(&self.flush_in_progress),
        );
        for (section, version, payload) in flushes {
            self.issue_one(section, version, payload, &group);
        }
        Ok(())
    }

    fn issue_one(
        &self,
        section: CtxSection,
        version: ContextVersion,
        payload: Vec<u8>,
        group: &Arc<FlushGroup>,
    ) {
        let group = Arc::clone(group);
        let stored = Arc::clone(&self.stored);
        self.store.write_section(
            section.name(),
            version.as_u64(),
            &payload,
            Box::new(move |result| {
                if result.is_ok() {
                    stored.record(section, version);
                }
                group.complete(section, result.map_err(CoreError::from));
            }),
        );
    }
}

impl std::fmt::Debug for ContextIoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextIoManager")
            .field(
                "flush_in_progress",
                &self.flush_in_progress.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}
