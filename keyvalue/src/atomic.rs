//! Bounded atomic write groups.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Value;

/// The wide-column service cannot transact more than 10 operations, so all
/// stores enforce this limit.
pub const MAX_ATOMIC_WRITE_OPERATIONS: usize = 10;

/// Per-operation outcome handle for an atomic write.
pub trait AtomicWriteResult: Send + Sync {
    /// Returns true if the group aborted because this operation's predicate
    /// did not hold.
    fn conditional_failed(&self) -> bool;
}

/// A group of conditional write operations that commit or abort as a unit.
///
/// Each queued operation returns a handle; after [`exec`](Self::exec)
/// reports an abort, the handles identify which predicates failed.
#[async_trait]
pub trait AtomicWriteOperation: Send {
    /// Sets the key only if it does not exist.
    fn set_nx(&mut self, key: &str, value: Value) -> Arc<dyn AtomicWriteResult>;

    /// Sets the key to `new` only if it currently holds `old`.
    fn cas(&mut self, key: &str, old: Value, new: Value) -> Arc<dyn AtomicWriteResult>;

    /// Unconditionally deletes the key.
    fn delete(&mut self, key: &str) -> Arc<dyn AtomicWriteResult>;

    /// Executes the group. Returns `Ok(false)` when a predicate failed, in
    /// which case no writes took place.
    async fn exec(self: Box<Self>) -> Result<bool>;
}
