//! Unified key-value store contract.
//!
//! This crate defines the abstraction shared by every storage backend in the
//! workspace: a store mapping opaque string keys to scalar values, unordered
//! sets, or sorted sets, with batched and atomic multi-key write facilities
//! layered on top.
//!
//! # Key Concepts
//!
//! - **[`Backend`]**: the store contract. Implemented by the in-process
//!   reference backend, the wide-column backend, the remote data-structure
//!   backend, and the read cache (which wraps any of the others).
//! - **[`Value`]**: a store value. Observably always a byte string; integers
//!   are tracked so backends with native numeric attributes can use them.
//! - **[`BatchOperation`]**: bulk dispatch of simple operations. Purely a
//!   performance facility; read isolation is backend-defined and atomicity
//!   must not be assumed.
//! - **[`AtomicWriteOperation`]**: up to [`MAX_ATOMIC_WRITE_OPERATIONS`]
//!   conditional writes that commit or abort as a unit.
//! - **[`score`]**: the order-preserving float-to-bytes codec that backends
//!   use to index sorted sets on byte-range substrates.
//!
//! # Example
//!
//! ```ignore
//! use keyvalue::Backend;
//!
//! let backend = memorystore::Backend::new();
//! backend.set("user:123", "alice".into()).await?;
//! assert_eq!(backend.get("user:123").await?, Some("alice".into()));
//!
//! backend.z_add("leaders", "alice".into(), 41.0).await?;
//! let top = backend.z_rev_range_by_score("leaders", 0.0, f64::INFINITY, 10).await?;
//! ```

mod atomic;
mod backend;
mod batch;
mod error;
mod model;

pub mod bounds;
pub mod score;
pub mod util;

pub use atomic::{AtomicWriteOperation, AtomicWriteResult, MAX_ATOMIC_WRITE_OPERATIONS};
pub use backend::{Backend, CasTransform};
pub use batch::{BatchOperation, BatchResult, FallbackBatchOperation};
pub use bounds::LexBound;
pub use error::{Error, Result};
pub use model::{scored_values, ScoredMember, Value};
