//! Array geometry.

use crate::types::{SegmentId, StripeId};

/// Geometry of the user area: how blocks, stripes, and segments nest.
///
/// Built once at array assembly and passed by value to every component
/// that needs to translate between addresses and segments. Immutable for
/// the array's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    blks_per_stripe: u32,
    stripes_per_segment: u32,
    num_segments: u32,
}

impl AddressInfo {
    /// Creates geometry for `num_segments` segments of
    /// `stripes_per_segment` stripes of `blks_per_stripe` blocks.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is zero.
    #[must_use]
    pub fn new(blks_per_stripe: u32, stripes_per_segment: u32, num_segments: u32) -> Self {
        assert!(blks_per_stripe > 0, "blks_per_stripe must be non-zero");
        assert!(stripes_per_segment > 0, "stripes_per_segment must be non-zero");
        assert!(num_segments > 0, "num_segments must be non-zero");
        Self {
            blks_per_stripe,
            stripes_per_segment,
            num_segments,
        }
    }

    /// Blocks per stripe.
    #[must_use]
    pub const fn blks_per_stripe(&self) -> u32 {
        self.blks_per_stripe
    }

    /// Stripes per segment.
    #[must_use]
    pub const fn stripes_per_segment(&self) -> u32 {
        self.stripes_per_segment
    }

    /// Number of user-area segments.
    #[must_use]
    pub const fn num_segments(&self) -> u32 {
        self.num_segments
    }

    /// Blocks per segment.
    #[must_use]
    pub const fn blks_per_segment(&self) -> u32 {
        self.blks_per_stripe * self.stripes_per_segment
    }

    /// Total stripes in the user area.
    #[must_use]
    pub const fn total_stripes(&self) -> u32 {
        self.stripes_per_segment * self.num_segments
    }

    /// The segment owning `stripe`.
    ///
    /// # Panics
    ///
    /// Panics if `stripe` is outside the user area.
    #[must_use]
    pub fn segment_of_stripe(&self, stripe: StripeId) -> SegmentId {
        assert!(
            stripe.as_u32() < self.total_stripes(),
            "stripe {} outside user area ({} stripes)",
            stripe,
            self.total_stripes()
        );
        SegmentId::new(stripe.as_u32() / self.stripes_per_segment)
    }

    /// First stripe of `segment`.
    #[must_use]
    pub const fn first_stripe_of_segment(&self, segment: SegmentId) -> StripeId {
        StripeId::new(segment.as_u32() * self.stripes_per_segment)
    }

    /// Whether `segment` is within the user area.
    #[must_use]
    pub const fn contains_segment(&self, segment: SegmentId) -> bool {
        segment.as_u32() < self.num_segments
    }
}
