//! Context manager: the allocator-facing façade.

use crate::address::AddressInfo;
use crate::context::allocator::AllocatorCtx;
use crate::context::header::CtxSection;
use crate::context::io::{CheckpointCallback, ContextIoManager};
use crate::error::CoreResult;
use crate::event::EventScheduler;
use crate::rebuild::RebuildCtx;
use crate::segment::{SegmentCtx, SegmentState};
use crate::types::{ContextVersion, SegmentId, StripeId, VirtualBlocks};
use segmeta_store::MetaStore;
use std::sync::Arc;

/// Coordinates the segment, allocator, and rebuild contexts.
///
/// One instance per array. Exclusively owns its contexts; the write
/// path, GC, rebuild control, and the checkpoint trigger all go through
/// this API - no caller holds a reference to the raw record arena.
///
/// Construction wires the freed-segment notification into the allocator
/// bitmap, so the free pool tracks the state machine without callers
/// doing bookkeeping of their own.
pub struct ContextManager {
    addr: AddressInfo,
    segment_ctx: Arc<SegmentCtx>,
    allocator_ctx: Arc<AllocatorCtx>,
    rebuild_ctx: Arc<RebuildCtx>,
    io: ContextIoManager,
}

impl ContextManager {
    /// Assembles a context manager over a metadata store.
    pub fn new(
        addr: AddressInfo,
        store: Arc<dyn MetaStore>,
        scheduler: Arc<dyn EventScheduler>,
    ) -> Self {
        let rebuild_ctx = Arc::new(RebuildCtx::new());
        let segment_ctx = Arc::new(SegmentCtx::new(
            addr,
            Arc::clone(&rebuild_ctx),
            Arc::clone(&scheduler),
        ));
        let allocator_ctx = Arc::new(AllocatorCtx::new(addr.num_segments()));

        let bitmap = Arc::clone(&allocator_ctx);
        segment_ctx.set_freed_listener(Arc::new(move |segment| {
            bitmap.mark_free(segment);
        }));

        Self {
            addr,
            segment_ctx,
            allocator_ctx,
            rebuild_ctx,
            io: ContextIoManager::new(store, scheduler),
        }
    }

    /// Array geometry.
    #[must_use]
    pub fn address_info(&self) -> AddressInfo {
        self.addr
    }

    /// Recovers persisted contexts from the store.
    ///
    /// Missing sections mean first boot and leave the in-memory defaults
    /// in place. When the segment context is recovered but the allocator
    /// context is not, the free bitmap is derived from segment states.
    /// Returns whether any persisted state was found.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure or a malformed image.
    pub fn load(&self) -> CoreResult<bool> {
        let mut any = false;

        let segment_image = self.io.load_section(CtxSection::Segment)?;
        if let Some((version, body)) = &segment_image {
            self.segment_ctx.unpack(body)?;
            self.segment_ctx.set_version(*version);
            any = true;
        }

        if let Some((version, body)) = self.io.load_section(CtxSection::Allocator)? {
            self.allocator_ctx.unpack(&body)?;
            self.allocator_ctx.set_version(version);
            any = true;
        } else if segment_image.is_some() {
            for id in 0..self.addr.num_segments() {
                let segment = SegmentId::new(id);
                if self.segment_ctx.segment_state(segment) == SegmentState::Free {
                    self.allocator_ctx.mark_free(segment);
                } else {
                    self.allocator_ctx.mark_in_use(segment);
                }
            }
        }

        if let Some((version, body)) = self.io.load_section(CtxSection::Rebuild)? {
            self.rebuild_ctx.unpack(&body)?;
            self.rebuild_ctx.set_version(version);
            any = true;
        }

        if any {
            tracing::info!(
                segment = self.io.stored_context_version(CtxSection::Segment).as_u64(),
                allocator = self.io.stored_context_version(CtxSection::Allocator).as_u64(),
                rebuild = self.io.stored_context_version(CtxSection::Rebuild).as_u64(),
                "contexts recovered"
            );
        }
        Ok(any)
    }

    // --- checkpoint trigger -------------------------------------------------

    /// Flushes all contexts asynchronously; see
    /// [`ContextIoManager::flush_contexts`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::FlushInProgress`] if a cycle is
    /// already in flight.
    pub fn flush_contexts(
        &self,
        callback: CheckpointCallback,
        external_buffer: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        self.io.flush_contexts(
            &self.segment_ctx,
            &self.allocator_ctx,
            &self.rebuild_ctx,
            callback,
            external_buffer,
        )
    }

    /// Flushes all contexts, blocking until the umbrella completes; see
    /// [`ContextIoManager::flush_contexts_sync`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::FlushInProgress`] if a cycle is
    /// already in flight, or the worst-case constituent status.
    pub fn flush_contexts_sync(&self, external_buffer: Option<Vec<u8>>) -> CoreResult<()> {
        self.io.flush_contexts_sync(
            &self.segment_ctx,
            &self.allocator_ctx,
            &self.rebuild_ctx,
            external_buffer,
        )
    }

    /// Flushes only the rebuild context; see
    /// [`ContextIoManager::flush_rebuild_context`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::FlushInProgress`] if a cycle is
    /// already in flight.
    pub fn flush_rebuild_context(&self, callback: CheckpointCallback) -> CoreResult<()> {
        self.io.flush_rebuild_context(&self.rebuild_ctx, callback)
    }

    /// Captures the current segment-context image for a later
    /// `external_buffer` flush.
    #[must_use]
    pub fn capture_segment_image(&self) -> Vec<u8> {
        self.segment_ctx.pack()
    }

    /// Last durably stored version of a section.
    #[must_use]
    pub fn stored_context_version(&self, section: CtxSection) -> ContextVersion {
        self.io.stored_context_version(section)
    }

    // --- write path ---------------------------------------------------------

    /// Registers newly written live blocks; see
    /// [`SegmentCtx::validate_blks`].
    ///
    /// A segment claimed by this write (journal replay onto a `Free`
    /// segment) leaves the free bitmap.
    pub fn validate_blks(&self, blks: VirtualBlocks) {
        if self.segment_ctx.validate_blks(blks) {
            let segment = self.addr.segment_of_stripe(blks.start_vsa.stripe_id);
            self.allocator_ctx.mark_in_use(segment);
        }
    }

    /// Removes live blocks; see [`SegmentCtx::invalidate_blks`].
    pub fn invalidate_blks(&self, blks: VirtualBlocks, is_force: bool) -> bool {
        self.segment_ctx.invalidate_blks(blks, is_force)
    }

    /// Registers a sealed stripe; see
    /// [`SegmentCtx::update_occupied_stripe_count`].
    pub fn update_occupied_stripe_count(&self, stripe: StripeId) -> bool {
        self.segment_ctx.update_occupied_stripe_count(stripe)
    }

    /// Claims a free segment for writing and updates the free bitmap.
    pub fn allocate_free_segment(&self) -> Option<SegmentId> {
        let segment = self.segment_ctx.allocate_free_segment()?;
        self.allocator_ctx.mark_in_use(segment);
        Some(segment)
    }

    // --- GC / rebuild paths -------------------------------------------------

    /// Selects a GC victim; see [`SegmentCtx::allocate_victim_segment`].
    pub fn allocate_victim_segment(&self) -> Option<SegmentId> {
        self.segment_ctx.allocate_victim_segment()
    }

    /// Marks every sealed segment as a rebuild target; see
    /// [`SegmentCtx::make_rebuild_target`].
    pub fn make_rebuild_target(&self) -> usize {
        self.segment_ctx.make_rebuild_target()
    }

    /// Selects the next unclaimed rebuild target; see
    /// [`SegmentCtx::rebuild_target_segment`].
    pub fn rebuild_target_segment(&self) -> Option<SegmentId> {
        self.segment_ctx.rebuild_target_segment()
    }

    /// Completes the rebuild of a claimed target; see
    /// [`SegmentCtx::complete_rebuild_target`].
    pub fn complete_rebuild_target(&self, segment: SegmentId) {
        self.segment_ctx.complete_rebuild_target(segment);
    }

    /// Aborts an in-progress rebuild; see [`SegmentCtx::stop_rebuilding`].
    pub fn stop_rebuilding(&self) {
        self.segment_ctx.stop_rebuilding();
    }

    /// Number of remaining rebuild targets.
    #[must_use]
    pub fn rebuild_target_count(&self) -> usize {
        self.rebuild_ctx.target_count()
    }

    // --- reads --------------------------------------------------------------

    /// Current state of a segment.
    #[must_use]
    pub fn segment_state(&self, segment: SegmentId) -> SegmentState {
        self.segment_ctx.segment_state(segment)
    }

    /// Occupied stripe count of a segment.
    #[must_use]
    pub fn occupied_stripe_count(&self, segment: SegmentId) -> u32 {
        self.segment_ctx.occupied_stripe_count(segment)
    }

    /// Valid block count of a segment.
    #[must_use]
    pub fn valid_block_count(&self, segment: SegmentId) -> u32 {
        self.segment_ctx.valid_block_count(segment)
    }

    /// Number of segments marked free in the allocator bitmap.
    #[must_use]
    pub fn free_segment_count(&self) -> u32 {
        self.allocator_ctx.free_count()
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("segments", &self.addr.num_segments())
            .field("free", &self.free_segment_count())
            .field("rebuild_targets", &self.rebuild_target_count())
            .finish_non_exhaustive()
    }
}
