//! Rebuild context: the set of segments under rebuild.

use crate::error::{CoreError, CoreResult};
use crate::types::{ContextVersion, SegmentId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct RebuildCtxInner {
    /// Segments still needing reconstruction.
    targets: BTreeSet<u32>,
    /// Targets currently claimed by a rebuild worker.
    claimed: BTreeSet<u32>,
}

/// Tracks which segments must be reconstructed after a member loss.
///
/// Populated when a rebuild starts, drained as segments finish, empty in
/// steady state. The target set is persisted at checkpoint; claims are
/// volatile - after a crash, every remaining target is rebuilt again.
///
/// Its lock is independent of the segment record locks, so target
/// bookkeeping never serializes against counter updates.
#[derive(Debug, Default)]
pub struct RebuildCtx {
    inner: Mutex<RebuildCtxInner>,
    version: AtomicU64,
}

impl RebuildCtx {
    /// Creates an empty rebuild context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the target set; clears all claims.
    pub fn initialize<I>(&self, targets: I)
    where
        I: IntoIterator<Item = SegmentId>,
    {
        let mut inner = self.inner.lock();
        inner.targets = targets.into_iter().map(SegmentId::as_u32).collect();
        inner.claimed.clear();
        tracing::info!(targets = inner.targets.len(), "rebuild target list created");
    }

    /// The lowest-id target not yet claimed, or `None`.
    #[must_use]
    pub fn next_unclaimed(&self) -> Option<SegmentId> {
        let inner = self.inner.lock();
        inner
            .targets
            .iter()
            .find(|id| !inner.claimed.contains(*id))
            .copied()
            .map(SegmentId::new)
    }

    /// Claims a target for a rebuild worker; returns `false` if it is not
    /// a target or is already claimed.
    pub fn claim(&self, segment: SegmentId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.targets.contains(&segment.as_u32()) {
            return false;
        }
        inner.claimed.insert(segment.as_u32())
    }

    /// Releases a claim without removing the target (rebuild retry).
    pub fn release_claim(&self, segment: SegmentId) {
        self.inner.lock().claimed.remove(&segment.as_u32());
    }

    /// Removes a segment from the target set (rebuild done, or the
    /// segment was freed). Returns whether it was a target.
    pub fn remove_target(&self, segment: SegmentId) -> bool {
        let mut inner = self.inner.lock();
        inner.claimed.remove(&segment.as_u32());
        let removed = inner.targets.remove(&segment.as_u32());
        if removed {
            tracing::debug!(segment = %segment, remaining = inner.targets.len(),
                "segment left rebuild target list");
        }
        removed
    }

    /// Whether a segment is currently a rebuild target.
    #[must_use]
    pub fn is_target(&self, segment: SegmentId) -> bool {
        self.inner.lock().targets.contains(&segment.as_u32())
    }

    /// Number of remaining targets.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.inner.lock().targets.len()
    }

    /// Drains the target set and claims.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.targets.clear();
        inner.claimed.clear();
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

    /// Encodes the target set for persistence.
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut buf = Vec::with_capacity(4 + inner.targets.len() * 4);
        buf.extend_from_slice(&(inner.targets.len() as u32).to_le_bytes());
        for &id in &inner.targets {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    /// Restores the target set from a persisted image.
    pub fn unpack(&self, payload: &[u8]) -> CoreResult<()> {
        if payload.len() < 4 {
            return Err(CoreError::invalid_format("rebuild context too short"));
        }
        let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if payload.len() < 4 + count * 4 {
            return Err(CoreError::invalid_format("rebuild context truncated"));
        }

        let mut targets = BTreeSet::new();
        for i in 0..count {
            let off = 4 + i * 4;
            targets.insert(u32::from_le_bytes([
                payload[off],
                payload[off + 1],
                payload[off + 2],
                payload[off + 3],
            ]));
        }

        let mut inner = self.inner.lock();
        inner.targets = targets;
        inner.claimed.clear();
        Ok(())
    }
}
