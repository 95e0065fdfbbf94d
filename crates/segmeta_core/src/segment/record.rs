//! Per-segment record: counters and state machine.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Mutex, MutexGuard};

/// Lifecycle state of a segment.
///
/// Normal cycle: `Free` → `Allocating` → `Ssd` → (`Victim` →) `Free`.
/// An array rebuild moves non-free segments to `RebuildTarget`; they
/// return to `Ssd` (or `Free`) when their rebuild completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentState {
    /// No live data; eligible for allocation.
    Free = 0,
    /// Currently being written; stripes accumulating.
    Allocating = 1,
    /// Fully occupied and sealed; eligible for GC victim selection.
    Ssd = 2,
    /// Selected for garbage collection; blocks being relocated.
    Victim = 3,
    /// Data must be reconstructed after a member loss.
    RebuildTarget = 4,
}

impl SegmentState {
    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Converts a byte to a state.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Free),
            1 => Some(Self::Allocating),
            2 => Some(Self::Ssd),
            3 => Some(Self::Victim),
            4 => Some(Self::RebuildTarget),
            _ => None,
        }
    }
}

/// Counters and state of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRecordData {
    /// Blocks within the segment currently holding live data.
    pub valid_block_count: u32,
    /// Stripes within the segment that have been written and sealed.
    pub occupied_stripe_count: u32,
    /// Lifecycle state.
    pub state: SegmentState,
}

impl Default for SegmentRecordData {
    fn default() -> Self {
        Self {
            valid_block_count: 0,
            occupied_stripe_count: 0,
            state: SegmentState::Free,
        }
    }
}

impl SegmentRecordData {
    /// Encoded size: valid (4) + occupied (4) + state (1).
    pub const ENCODED_SIZE: usize = 9;

    /// Creates a fresh record: free, all counters zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `count` newly written live blocks; returns `true` if
    /// this claimed the segment (`Free` → `Allocating`).
    ///
    /// Journal replay rebuilds counters through this same path, so a
    /// `Free` segment enters `Allocating` implicitly.
    ///
    /// # Panics
    ///
    /// Panics if the count would exceed `blks_per_segment`.
    pub fn validate(&mut self, count: u32, blks_per_segment: u32) -> bool {
        let new_count = self.valid_block_count + count;
        assert!(
            new_count <= blks_per_segment,
            "valid block count {new_count} exceeds segment capacity {blks_per_segment}"
        );
        self.valid_block_count = new_count;

        if self.state == SegmentState::Free {
            self.state = SegmentState::Allocating;
            return true;
        }
        false
    }

    /// Removes `count` live blocks; returns `true` if the segment
    /// transitioned to `Free`.
    ///
    /// Without `force`, only an `Ssd` or `Victim` segment is freed when
    /// its count reaches zero. With `force` (rebuild/recovery paths) the
    /// state precondition is bypassed.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the current valid block count.
    pub fn invalidate(&mut self, count: u32, force: bool) -> bool {
        assert!(
            count <= self.valid_block_count,
            "invalidating {count} blocks but only {} are valid",
            self.valid_block_count
        );
        self.valid_block_count -= count;

        if self.valid_block_count > 0 {
            return false;
        }
        let freeable =
            force || self.state == SegmentState::Ssd || self.state == SegmentState::Victim;
        if freeable {
            self.state = SegmentState::Free;
            self.occupied_stripe_count = 0;
        }
        freeable
    }

    /// Registers one sealed stripe; returns `true` if this sealed the
    /// whole segment (`Allocating` → `Ssd`).
    ///
    /// # Panics
    ///
    /// Panics if the count would exceed `stripes_per_segment`.
    pub fn occupy_stripe(&mut self, stripes_per_segment: u32) -> bool {
        let new_count = self.occupied_stripe_count + 1;
        assert!(
            new_count <= stripes_per_segment,
            "occupied stripe count {new_count} exceeds {stripes_per_segment}"
        );
        self.occupied_stripe_count = new_count;

        if new_count == stripes_per_segment && self.state == SegmentState::Allocating {
            self.state = SegmentState::Ssd;
            return true;
        }
        false
    }

    /// Encodes the record to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..4].copy_from_slice(&self.valid_block_count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.occupied_stripe_count.to_le_bytes());
        buf[8] = self.state.as_byte();
        buf
    }

    /// Decodes a record from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < Self::ENCODED_SIZE {
            return Err(CoreError::invalid_format("segment record too short"));
        }
        let valid_block_count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let occupied_stripe_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let state = SegmentState::from_byte(data[8])
            .ok_or_else(|| CoreError::invalid_format(format!("unknown segment state {}", data[8])))?;
        Ok(Self {
            valid_block_count,
            occupied_stripe_count,
            state,
        })
    }
}

/// One arena cell: a segment's record behind its own lock.
///
/// Per-record locking keeps operations on different segments fully
/// parallel; a single record's counter updates and state transitions are
/// linearizable under its mutex.
#[derive(Debug, Default)]
pub struct SegmentRecord {
    inner: Mutex<SegmentRecordData>,
}

impl SegmentRecord {
    /// Creates a fresh record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record with the given data (recovery).
    #[must_use]
    pub fn with_data(data: SegmentRecordData) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    /// Locks the record for a compound read-modify-write.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SegmentRecordData> {
        self.inner.lock()
    }

    /// Returns a consistent copy of the record.
    #[must_use]
    pub fn snapshot(&self) -> SegmentRecordData {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fresh_record_is_free() {
        let data = SegmentRecordData::new();
        assert_eq!(data.state, SegmentState::Free);
        assert_eq!(data.valid_block_count, 0);
        assert_eq!(data.occupied_stripe_count, 0);
    }

    #[test]
    fn validate_moves_free_to_allocating() {
        let mut data = SegmentRecordData::new();
        assert!(data.validate(8, 64));
        assert_eq!(data.state, SegmentState::Allocating);
        assert_eq!(data.valid_block_count, 8);

        // Already claimed.
        assert!(!data.validate(8, 64));
    }

    #[test]
    #[should_panic(expected = "exceeds segment capacity")]
    fn validate_over_capacity_panics() {
        let mut data = SegmentRecordData::new();
        data.validate(65, 64);
    }

    #[test]
    fn seal_on_last_stripe_only() {
        let mut data = SegmentRecordData::new();
        data.validate(1, 64);

        assert!(!data.occupy_stripe(4));
        assert!(!data.occupy_stripe(4));
        assert!(!data.occupy_stripe(4));
        assert!(data.occupy_stripe(4));
        assert_eq!(data.state, SegmentState::Ssd);
        assert_eq!(data.occupied_stripe_count, 4);
    }

    #[test]
    #[should_panic(expected = "occupied stripe count")]
    fn occupy_past_full_panics() {
        let mut data = SegmentRecordData::new();
        for _ in 0..4 {
            data.occupy_stripe(4);
        }
        data.occupy_stripe(4);
    }

    #[test]
    fn invalidate_to_zero_frees_ssd() {
        let mut data = SegmentRecordData {
            valid_block_count: 4,
            occupied_stripe_count: 4,
            state: SegmentState::Ssd,
        };
        assert!(!data.invalidate(3, false));
        assert!(data.invalidate(1, false));
        assert_eq!(data.state, SegmentState::Free);
        assert_eq!(data.occupied_stripe_count, 0);
    }

    #[test]
    fn invalidate_to_zero_frees_victim() {
        let mut data = SegmentRecordData {
            valid_block_count: 1,
            occupied_stripe_count: 4,
            state: SegmentState::Victim,
        };
        assert!(data.invalidate(1, false));
        assert_eq!(data.state, SegmentState::Free);
    }

    #[test]
    fn invalidate_to_zero_keeps_allocating() {
        let mut data = SegmentRecordData::new();
        data.validate(2, 64);
        assert!(!data.invalidate(2, false));
        assert_eq!(data.state, SegmentState::Allocating);
    }

    #[test]
    fn force_invalidate_frees_any_state() {
        let mut data = SegmentRecordData::new();
        data.validate(2, 64);
        assert!(data.invalidate(2, true));
        assert_eq!(data.state, SegmentState::Free);
        assert_eq!(data.occupied_stripe_count, 0);
    }

    #[test]
    #[should_panic(expected = "are valid")]
    fn invalidate_underflow_panics() {
        let mut data = SegmentRecordData::new();
        data.invalidate(1, false);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let data = SegmentRecordData {
            valid_block_count: 17,
            occupied_stripe_count: 3,
            state: SegmentState::Victim,
        };
        let decoded = SegmentRecordData::decode(&data.encode()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_unknown_state_rejected() {
        let mut encoded = SegmentRecordData::new().encode();
        encoded[8] = 0xFF;
        assert!(SegmentRecordData::decode(&encoded).is_err());
    }

    proptest! {
        /// Counter bounds: any interleaving of in-bounds validates and
        /// invalidates keeps the count within [0, blks_per_segment].
        #[test]
        fn counter_stays_in_bounds(ops in proptest::collection::vec(0u32..16, 1..64)) {
            const CAPACITY: u32 = 64;
            let mut data = SegmentRecordData::new();
            for op in ops {
                // Alternate validate/invalidate, clamped to what the
                // counter can legally absorb.
                let headroom = CAPACITY - data.valid_block_count;
                let add = op.min(headroom);
                if add > 0 {
                    data.validate(add, CAPACITY);
                }
                prop_assert!(data.valid_block_count <= CAPACITY);

                let remove = op.min(data.valid_block_count);
                if remove > 0 {
                    data.invalidate(remove, false);
                }
                prop_assert!(data.valid_block_count <= CAPACITY);
            }
        }
    }
}
