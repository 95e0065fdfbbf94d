//! Allocator-wide context: the free-segment bitmap.

use crate::error::{CoreError, CoreResult};
use crate::types::{ContextVersion, SegmentId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct SegmentBitmap {
    words: Vec<u64>,
    num_segments: u32,
}

impl SegmentBitmap {
    fn new_all_set(num_segments: u32) -> Self {
        let word_count = num_segments.div_ceil(64) as usize;
        let mut words = vec![u64::MAX; word_count];
        // Mask off bits past the last segment.
        let tail = num_segments % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self {
            words,
            num_segments,
        }
    }

    fn get(&self, bit: u32) -> bool {
        self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: u32) -> bool {
        let word = &mut self.words[(bit / 64) as usize];
        let mask = 1u64 << (bit % 64);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    fn clear(&mut self, bit: u32) -> bool {
        let word = &mut self.words[(bit / 64) as usize];
        let mask = 1u64 << (bit % 64);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    fn count_set(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    fn first_set(&self) -> Option<u32> {
        for (idx, &word) in self.words.iter().enumerate() {
            if word != 0 {
                return Some(idx as u32 * 64 + word.trailing_zeros());
            }
        }
        None
    }
}

/// Allocator-wide bookkeeping: which segments are free.
///
/// Persisted at checkpoint so recovery can resume allocation without
/// rescanning the segment arena. Kept in sync with the segment state
/// machine by [`super::ContextManager`]: a set bit means free.
#[derive(Debug)]
pub struct AllocatorCtx {
    bitmap: Mutex<SegmentBitmap>,
    version: AtomicU64,
}

impl AllocatorCtx {
    /// Creates an allocator context with every segment free.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is zero.
    #[must_use]
    pub fn new(num_segments: u32) -> Self {
        assert!(num_segments > 0, "num_segments must be non-zero");
        Self {
            bitmap: Mutex::new(SegmentBitmap::new_all_set(num_segments)),
            version: AtomicU64::new(0),
        }
    }

    fn check_segment(&self, segment: SegmentId) -> u32 {
        let bit = segment.as_u32();
        assert!(
            bit < self.bitmap.lock().num_segments,
            "{segment} outside user area"
        );
        bit
    }

    /// Marks a segment free. Returns whether the bit changed.
    pub fn mark_free(&self, segment: SegmentId) -> bool {
        let bit = self.check_segment(segment);
        self.bitmap.lock().set(bit)
    }

    /// Marks a segment in use. Returns whether the bit changed.
    pub fn mark_in_use(&self, segment: SegmentId) -> bool {
        let bit = self.check_segment(segment);
        self.bitmap.lock().clear(bit)
    }

    /// Whether a segment is marked free.
    #[must_use]
    pub fn is_free(&self, segment: SegmentId) -> bool {
        let bit = self.check_segment(segment);
        self.bitmap.lock().get(bit)
    }

    /// Number of segments marked free.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.bitmap.lock().count_set()
    }

    /// Lowest-id free segment, if any.
    #[must_use]
    pub fn first_free(&self) -> Option<SegmentId> {
        self.bitmap.lock().first_set().map(SegmentId::new)
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

    /// Encodes the bitmap for persistence.
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let bitmap = self.bitmap.lock();
        let mut buf = Vec::with_capacity(4 + bitmap.words.len() * 8);
        buf.extend_from_slice(&bitmap.num_segments.to_le_bytes());
        for word in &bitmap.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Restores the bitmap from a persisted image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is malformed or sized for a
    /// different segment count.
    pub fn unpack(&self, payload: &[u8]) -> CoreResult<()> {
        if payload.len() < 4 {
            return Err(CoreError::invalid_format("allocator context too short"));
        }
        let num_segments = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);

        let mut bitmap = self.bitmap.lock();
        if num_segments != bitmap.num_segments {
            return Err(CoreError::invalid_format(format!(
                "allocator context sized for {num_segments} segments, array has {}",
                bitmap.num_segments
            )));
        }

        let word_count = bitmap.words.len();
        if payload.len() < 4 + word_count * 8 {
            return Err(CoreError::invalid_format("allocator context truncated"));
        }

        for (idx, word) in bitmap.words.iter_mut().enumerate() {
            let off = 4 + idx * 8;
            *word = u64::from_le_bytes([
                payload[off],
                payload[off + 1],
                payload[off + 2],
                payload[off + 3],
                payload[off + 4],
                payload[off + 5],
                payload[off + 6],
                payload[off + 7],
            ]);
        }
        Ok(())
    }
}
