//! Wide-column table backend.
//!
//! Persists the store in a single table keyed by `(hk, rk)` with a local
//! secondary index on `(hk, rk2)`:
//!
//! | Logical shape | Layout |
//! |---|---|
//! | Scalar | one item: `hk = key`, `rk = "_"`, attribute `v` |
//! | Unordered set, shard `i` | `hk = key`, `rk = varint(i)`, byte-set `v`, boolean `c` |
//! | Sorted-set entry | one item per member: `hk = key`, `rk = member`, `v = member`, `rk2 = encode(score) ‖ member` |
//!
//! Unordered sets transparently shard across items when they outgrow the
//! service's per-item size ceiling; a shard's `c` ("closed") marker tells
//! readers to keep paginating past it. Sorted-set range queries run against
//! the `rk2` index in score mode and the primary sort key in lexical mode.
//!
//! The service itself is reached through the [`client::TableClient`] seam.
//! An in-process simulation ([`LocalTableClient`]) backs the conformance
//! suite and local development.

mod atomic;
mod backend;
mod batch;
mod local;
mod profiler;

pub mod client;

pub use backend::{create_default_table, Backend};
pub use local::LocalTableClient;
pub use profiler::{BasicProfiler, Profiler, ProfilingTableClient};
