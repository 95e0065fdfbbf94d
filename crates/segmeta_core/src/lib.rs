//! # segmeta Core
//!
//! Allocator metadata core for a log-structured SSD array storage engine.
//!
//! This crate provides:
//! - Segment state tracking: per-segment validity counters, occupied
//!   stripe counters, and the free/allocate/reclaim/rebuild state machine
//! - Dependency-ordered checkpointing of the segment, allocator, and
//!   rebuild contexts to a metadata store
//! - Stripe-level exclusion locking for normal/busy mode switches
//!
//! The write path calls [`ContextManager::validate_blks`] /
//! [`ContextManager::invalidate_blks`] /
//! [`ContextManager::update_occupied_stripe_count`] as host I/O
//! completes; the checkpoint trigger calls
//! [`ContextManager::flush_contexts`]; the rebuild control loop drives
//! [`StripeLocker`] and the rebuild target selection API. Journal replay
//! reconstructs counters lost since the last checkpoint by calling the
//! same validate/invalidate entry points.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod context;
mod error;
mod event;
mod locker;
mod rebuild;
mod segment;
mod types;

pub use address::AddressInfo;
pub use context::{
    AllocatorCtx, CheckpointCallback, ContextIoManager, ContextManager, CtxHeader, CtxSection,
    CTX_FORMAT, CTX_MAGIC,
};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventScheduler, InlineScheduler, QueuedScheduler};
pub use locker::{LockerMode, StripeLocker};
pub use rebuild::RebuildCtx;
pub use segment::{SegmentCtx, SegmentFreedListener, SegmentRecord, SegmentRecordData, SegmentState};
pub use types::{ContextVersion, SegmentId, StripeId, VirtualBlockAddr, VirtualBlocks};
