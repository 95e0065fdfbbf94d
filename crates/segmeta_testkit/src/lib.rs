//! # segmeta Testkit
//!
//! Test utilities for segmeta.
//!
//! This crate provides:
//! - Fixtures that assemble a metadata core over an in-memory or
//!   file-backed store with a small, readable geometry
//! - Stress harnesses for the core's concurrency contracts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segmeta_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_core() {
//!     let core = TestCore::memory();
//!     fill_segment(&core, 0);
//!     // ... scenario
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use stress::*;
