//! # VineDB Testkit
//!
//! Test utilities for VineDB.
//!
//! This crate provides:
//! - Test fixtures, schema builders and logging setup
//! - Property-based test generators using proptest
//! - A concurrent stress harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vinedb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         db.create_class("Person").unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
