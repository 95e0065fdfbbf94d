//! Segment state tracking.
//!
//! The user area is an arena of fixed-size segment records, one per
//! segment, each holding a valid block counter, an occupied stripe
//! counter, and a lifecycle state. All mutation goes through
//! [`SegmentCtx`]; nothing else aliases the arena.
//!
//! ## Record Format (persisted image)
//!
//! ```text
//! | record_count (4) | per segment: valid (4) | occupied (4) | state (1) |
//! ```

mod ctx;
mod record;

pub use ctx::{SegmentCtx, SegmentFreedListener};
pub use record::{SegmentRecord, SegmentRecordData, SegmentState};
