//! Segment context: arena ownership and the allocation state machine.

use crate::address::AddressInfo;
use crate::error::{CoreError, CoreResult};
use crate::event::EventScheduler;
use crate::rebuild::RebuildCtx;
use crate::segment::record::{SegmentRecord, SegmentRecordData, SegmentState};
use crate::types::{ContextVersion, SegmentId, StripeId, VirtualBlocks};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked (via the event scheduler) when a segment becomes free.
pub type SegmentFreedListener = Arc<dyn Fn(SegmentId) + Send + Sync>;

/// Owns the segment record arena and drives the segment state machine.
///
/// Mutated concurrently by the write path (validate/invalidate/occupy)
/// and the GC/rebuild path (victim and target selection). Every record
/// has its own lock; operations on different segments never serialize
/// against each other.
///
/// Freed-segment notifications are handed to the [`EventScheduler`]; the
/// invalidate call that triggered them never blocks on a listener.
pub struct SegmentCtx {
    addr: AddressInfo,
    records: Vec<SegmentRecord>,
    rebuild: Arc<RebuildCtx>,
    scheduler: Arc<dyn EventScheduler>,
    freed_listener: RwLock<Option<SegmentFreedListener>>,
    version: AtomicU64,
}

impl SegmentCtx {
    /// Creates a segment context with all segments free.
    pub fn new(
        addr: AddressInfo,
        rebuild: Arc<RebuildCtx>,
        scheduler: Arc<dyn EventScheduler>,
    ) -> Self {
        let records = (0..addr.num_segments())
            .map(|_| SegmentRecord::new())
            .collect();
        Self {
            addr,
            records,
            rebuild,
            scheduler,
            freed_listener: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Registers the listener notified when a segment becomes free.
    ///
    /// Notification is asynchronous: the listener runs as a scheduled
    /// event, never inline from the invalidating call.
    pub fn set_freed_listener(&self, listener: SegmentFreedListener) {
        *self.freed_listener.write() = Some(listener);
    }

    /// Number of segments in the arena.
    #[must_use]
    pub fn segment_count(&self) -> u32 {
        self.records.len() as u32
    }

    fn record(&self, segment: SegmentId) -> &SegmentRecord {
        assert!(
            self.addr.contains_segment(segment),
            "{segment} outside user area ({} segments)",
            self.addr.num_segments()
        );
        &self.records[segment.as_u32() as usize]
    }

    fn owning_segment(&self, blks: VirtualBlocks) -> SegmentId {
        assert!(blks.num_blks > 0, "empty block range");
        let end = blks.start_vsa.offset + blks.num_blks;
        assert!(
            end <= self.addr.blks_per_stripe(),
            "block range [{}, {end}) crosses stripe boundary at {}",
            blks.start_vsa.offset,
            self.addr.blks_per_stripe()
        );
        self.addr.segment_of_stripe(blks.start_vsa.stripe_id)
    }

    fn notify_freed(&self, segment: SegmentId) {
        tracing::debug!(segment = %segment, "segment freed");
        let listener = self.freed_listener.read().clone();
        if let Some(listener) = listener {
            self.scheduler
                .enqueue(Box::new(move || listener(segment)));
        }
    }

    /// Registers newly written live blocks; returns `true` if this
    /// claimed the segment (`Free` → `Allocating`).
    ///
    /// A `Free` segment implicitly enters `Allocating`, which is how
    /// journal replay reconstructs counters through the public surface.
    ///
    /// # Panics
    ///
    /// Panics on a contract violation: an empty range, a range crossing
    /// a stripe boundary, an out-of-area stripe, or a count that would
    /// exceed the segment capacity.
    pub fn validate_blks(&self, blks: VirtualBlocks) -> bool {
        let segment = self.owning_segment(blks);
        self.record(segment)
            .lock()
            .validate(blks.num_blks, self.addr.blks_per_segment())
    }

    /// Removes live blocks; returns `true` if the segment became free.
    ///
    /// Reaching zero valid blocks frees an `Ssd` or `Victim` segment
    /// (resetting its occupied stripe count); `is_force` bypasses the
    /// state precondition for rebuild/recovery callers. A freed segment
    /// leaves the rebuild target list, and the freed listener is
    /// notified asynchronously.
    ///
    /// # Panics
    ///
    /// Panics on a contract violation: an empty or boundary-crossing
    /// range, an out-of-area stripe, or invalidating more blocks than
    /// are valid.
    pub fn invalidate_blks(&self, blks: VirtualBlocks, is_force: bool) -> bool {
        let segment = self.owning_segment(blks);
        let freed = self
            .record(segment)
            .lock()
            .invalidate(blks.num_blks, is_force);

        if freed {
            self.rebuild.remove_target(segment);
            self.notify_freed(segment);
        }
        freed
    }

    /// Registers one sealed stripe; returns `true` if this sealed the
    /// whole segment (`Allocating` → `Ssd`).
    ///
    /// # Panics
    ///
    /// Panics if `stripe` is outside the user area or the segment's
    /// stripe count would exceed `stripes_per_segment`.
    pub fn update_occupied_stripe_count(&self, stripe: StripeId) -> bool {
        let segment = self.addr.segment_of_stripe(stripe);
        let sealed = self
            .record(segment)
            .lock()
            .occupy_stripe(self.addr.stripes_per_segment());
        if sealed {
            tracing::debug!(segment = %segment, "segment sealed");
        }
        sealed
    }

    /// Current state of a segment.
    ///
    /// # Panics
    ///
    /// Panics if `segment` is outside the user area.
    #[must_use]
    pub fn segment_state(&self, segment: SegmentId) -> SegmentState {
        self.record(segment).snapshot().state
    }

    /// Occupied stripe count of a segment.
    ///
    /// # Panics
    ///
    /// Panics if `segment` is outside the user area.
    #[must_use]
    pub fn occupied_stripe_count(&self, segment: SegmentId) -> u32 {
        self.record(segment).snapshot().occupied_stripe_count
    }

    /// Valid block count of a segment.
    ///
    /// # Panics
    ///
    /// Panics if `segment` is outside the user area.
    #[must_use]
    pub fn valid_block_count(&self, segment: SegmentId) -> u32 {
        self.record(segment).snapshot().valid_block_count
    }

    /// Number of currently free segments.
    #[must_use]
    pub fn free_segment_count(&self) -> u32 {
        self.records
            .iter()
            .filter(|r| r.snapshot().state == SegmentState::Free)
            .count() as u32
    }

    /// Claims a free segment for writing (`Free` → `Allocating`).
    ///
    /// Returns `None` when no segment is free.
    pub fn allocate_free_segment(&self) -> Option<SegmentId> {
        for (idx, record) in self.records.iter().enumerate() {
            let mut data = record.lock();
            if data.state == SegmentState::Free {
                data.state = SegmentState::Allocating;
                return Some(SegmentId::new(idx as u32));
            }
        }
        None
    }

    /// Selects a GC victim: the sealed segment with the fewest live
    /// blocks (`Ssd` → `Victim`).
    ///
    /// Returns `None` when no sealed segment with live blocks exists.
    pub fn allocate_victim_segment(&self) -> Option<SegmentId> {
        // Candidates can change state between the scan and the claim;
        // re-verify under the record lock and rescan on a miss.
        for _ in 0..self.records.len() {
            let mut best: Option<(usize, u32)> = None;
            for (idx, record) in self.records.iter().enumerate() {
                let data = record.snapshot();
                if data.state == SegmentState::Ssd && data.valid_block_count > 0 {
                    let better = best.map_or(true, |(_, count)| data.valid_block_count < count);
                    if better {
                        best = Some((idx, data.valid_block_count));
                    }
                }
            }

            let (idx, _) = best?;
            let mut data = self.records[idx].lock();
            if data.state == SegmentState::Ssd && data.valid_block_count > 0 {
                data.state = SegmentState::Victim;
                return Some(SegmentId::new(idx as u32));
            }
        }
        None
    }

    /// Marks every sealed segment (`Ssd` or `Victim`) as a rebuild
    /// target and registers the list with the rebuild context.
    ///
    /// Returns the number of targets.
    pub fn make_rebuild_target(&self) -> usize {
        let mut targets = Vec::new();
        for (idx, record) in self.records.iter().enumerate() {
            let mut data = record.lock();
            if data.state == SegmentState::Ssd || data.state == SegmentState::Victim {
                data.state = SegmentState::RebuildTarget;
                targets.push(SegmentId::new(idx as u32));
            }
        }
        let count = targets.len();
        self.rebuild.initialize(targets);
        tracing::info!(targets = count, "rebuild targets marked");
        count
    }

    /// Selects the next rebuild target not yet claimed.
    ///
    /// Targets freed since the list was built are skipped and dropped
    /// from the list; an in-flight invalidate on the candidate segment
    /// cannot corrupt the selection.
    pub fn rebuild_target_segment(&self) -> Option<SegmentId> {
        loop {
            let candidate = self.rebuild.next_unclaimed()?;
            let state = self.record(candidate).snapshot().state;
            if state == SegmentState::RebuildTarget {
                if self.rebuild.claim(candidate) {
                    return Some(candidate);
                }
                // Lost the claim race; pick the next candidate.
                continue;
            }
            // The segment was freed (or otherwise left rebuild) since the
            // target list was built.
            self.rebuild.remove_target(candidate);
        }
    }

    /// Completes the rebuild of a claimed target.
    ///
    /// The segment returns to `Ssd`, or `Free` if every block was
    /// invalidated while it was being rebuilt.
    pub fn complete_rebuild_target(&self, segment: SegmentId) {
        let freed = {
            let mut data = self.record(segment).lock();
            if data.state != SegmentState::RebuildTarget {
                return;
            }
            if data.valid_block_count == 0 {
                data.state = SegmentState::Free;
                data.occupied_stripe_count = 0;
                true
            } else {
                data.state = SegmentState::Ssd;
                false
            }
        };

        self.rebuild.remove_target(segment);
        if freed {
            self.notify_freed(segment);
        }
    }

    /// Aborts an in-progress rebuild, restoring every remaining target
    /// (claimed or not).
    pub fn stop_rebuilding(&self) {
        for idx in 0..self.records.len() {
            let segment = SegmentId::new(idx as u32);
            if self.rebuild.is_target(segment) {
                self.complete_rebuild_target(segment);
            }
        }
        self.rebuild.clear();
    }

    /// Current version stamp.
    #[must_use]
    pub fn version(&self) -> ContextVersion {
        ContextVersion::new(self.version.load(Ordering::SeqCst))
    }

    /// Advances and returns the version for a flush about to be issued.
    pub(crate) fn next_version(&self) -> ContextVersion {
        ContextVersion::new(self.version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Restores the version stamp from a recovered image.
    pub(crate) fn set_version(&self, version: ContextVersion) {
        self.version.store(version.as_u64(), Ordering::SeqCst);
    }

    /// Encodes the arena for persistence.
    ///
    /// Each record is captured atomically under its own lock; the
    /// checkpoint caller is responsible for sequencing the capture
    /// against in-flight journal writes.
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(4 + self.records.len() * SegmentRecordData::ENCODED_SIZE);
        buf.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            buf.extend_from_slice(&record.snapshot().encode());
        }
        buf
    }

    /// Restores the arena from a persisted image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is malformed or its record count
    /// does not match this array's geometry.
    pub fn unpack(&self, payload: &[u8]) -> CoreResult<()> {
        if payload.len() < 4 {
            return Err(CoreError::invalid_format("segment context too short"));
        }
        let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if count != self.records.len() {
            return Err(CoreError::invalid_format(format!(
                "segment context holds {count} records, array has {}",
                self.records.len()
            )));
        }
        if payload.len() < 4 + count * SegmentRecordData::ENCODED_SIZE {
            return Err(CoreError::invalid_format("segment context truncated"));
        }

        for (idx, record) in self.records.iter().enumerate() {
            let off = 4 + idx * SegmentRecordData::ENCODED_SIZE;
            let data =
                SegmentRecordData::decode(&payload[off..off + SegmentRecordData::ENCODED_SIZE])?;
            *record.lock() = data;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SegmentCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCtx")
            .field("segments", &self.records.len())
            .field("free", &self.free_segment_count())
            .finish_non_exhaustive()
    }
}
