//! # arco-core
//!
//! Core abstractions shared by the Arco changelog sink components.
//!
//! This crate provides the foundational types used across the sink:
//!
//! - **Scalar Values**: Typed cell values with a deterministic canonical encoding
//! - **Rows**: Positional row payloads and process-independent hashing
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Crate Boundary
//!
//! `arco-core` is the **only** crate allowed to define shared primitives.
//! Reconciliation logic lives in `arco-sink` and builds on these types.
//!
//! ## Example
//!
//! ```rust
//! use arco_core::prelude::*;
//!
//! let row = Row::from_values([ScalarValue::Int64(1), ScalarValue::from("aaa")]);
//! assert_eq!(row.len(), 2);
//! assert_eq!(row.canonical_string(), "i:1,s:YWFh");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod observability;
pub mod row;
pub mod scalar;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use arco_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::row::{Row, stable_hash64};
    pub use crate::scalar::ScalarValue;
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use row::{Row, stable_hash64};
pub use scalar::ScalarValue;
