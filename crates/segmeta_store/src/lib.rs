//! # segmeta Store
//!
//! Versioned metadata section store for segmeta.
//!
//! This crate provides the lowest-level persistence abstraction for the
//! allocator metadata core. A store holds named **sections** (one per
//! metadata context), each written as a whole with a monotonically
//! increasing version. Stores are **opaque byte sinks** - they do not
//! interpret section payloads.
//!
//! ## Design Principles
//!
//! - Sections are written whole, never patched in place
//! - A write must not damage the latest intact copy of the section;
//!   if a write tears, the previous version remains readable
//! - Completion callbacks report durability, so callers can overlap
//!   several section flushes and aggregate the results
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral metadata
//! - [`FileStore`] - Persistent storage using alternating slot files
//!
//! ## Example
//!
//! ```rust
//! use segmeta_store::{InMemoryStore, MetaStore};
//!
//! let store = InMemoryStore::new();
//! store.write_section("segment_ctx", 1, b"payload", Box::new(|r| assert!(r.is_ok())));
//! let stored = store.read_section("segment_ctx").unwrap().unwrap();
//! assert_eq!(stored.version, 1);
//! assert_eq!(&stored.payload, b"payload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod slot;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use slot::compute_crc32;
pub use store::{FlushCompletion, MetaStore, StoredSection};
