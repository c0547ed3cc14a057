//! Batched dispatch of simple operations.
//!
//! Batches queue operations as explicit records carrying a shared result
//! slot, then run them as one bulk unit on [`exec`](BatchOperation::exec).
//! [`FallbackBatchOperation`] provides a serial implementation for backends
//! without a native bulk primitive.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::model::Value;

/// A handle to the result of a batched operation, populated by
/// [`BatchOperation::exec`].
#[derive(Debug)]
pub struct BatchResult<T> {
    slot: Arc<OnceLock<Result<T>>>,
}

impl<T> Clone for BatchResult<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self { slot: Arc::new(OnceLock::new()) }
    }

    /// Populates the handle. The first fill wins; later fills are ignored.
    pub fn fill(&self, result: Result<T>) {
        let _ = self.slot.set(result);
    }
}

impl<T: Clone> BatchResult<T> {
    /// Returns the operation's result after the batch has executed.
    pub fn result(&self) -> Result<T> {
        match self.slot.get() {
            Some(result) => result.clone(),
            None => Err(Error::Protocol("batch not executed".to_string())),
        }
    }
}

/// A batch of simple operations executed as one bulk unit.
///
/// Read isolation is backend-defined: a `get` batched alongside a `set` of
/// the same key observes the pre-batch value on some backends.
#[async_trait]
pub trait BatchOperation: Send {
    fn get(&mut self, key: &str) -> BatchResult<Option<Value>>;

    /// Deletes the key; the result reports whether it existed.
    fn delete(&mut self, key: &str) -> BatchResult<bool>;

    fn set(&mut self, key: &str, value: Value) -> BatchResult<()>;

    fn s_members(&mut self, key: &str) -> BatchResult<Vec<Value>>;

    fn s_add(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()>;

    fn s_rem(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()>;

    fn z_add(&mut self, key: &str, member: Value, score: f64) -> BatchResult<()>;

    fn z_rem(&mut self, key: &str, member: Value) -> BatchResult<()>;

    /// Runs the batched operations and populates every handle. Returns the
    /// first error encountered, after running the remaining operations.
    async fn exec(self: Box<Self>) -> Result<()>;
}

enum DeferredOp {
    Get { key: String, result: BatchResult<Option<Value>> },
    Delete { key: String, result: BatchResult<bool> },
    Set { key: String, value: Value, result: BatchResult<()> },
    SMembers { key: String, result: BatchResult<Vec<Value>> },
    SAdd { key: String, members: Vec<Value>, result: BatchResult<()> },
    SRem { key: String, members: Vec<Value>, result: BatchResult<()> },
    ZAdd { key: String, member: Value, score: f64, result: BatchResult<()> },
    ZRem { key: String, member: Value, result: BatchResult<()> },
}

/// A suitable fallback for backends that don't support optimized batching:
/// operations are dispatched serially, in enqueue order.
pub struct FallbackBatchOperation<'a> {
    backend: &'a dyn Backend,
    ops: Vec<DeferredOp>,
}

impl<'a> FallbackBatchOperation<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend, ops: Vec::new() }
    }

    /// True when no operations have been queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[async_trait]
impl BatchOperation for FallbackBatchOperation<'_> {
    fn get(&mut self, key: &str) -> BatchResult<Option<Value>> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::Get { key: key.to_string(), result: result.clone() });
        result
    }

    fn delete(&mut self, key: &str) -> BatchResult<bool> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::Delete { key: key.to_string(), result: result.clone() });
        result
    }

    fn set(&mut self, key: &str, value: Value) -> BatchResult<()> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::Set { key: key.to_string(), value, result: result.clone() });
        result
    }

    fn s_members(&mut self, key: &str) -> BatchResult<Vec<Value>> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::SMembers { key: key.to_string(), result: result.clone() });
        result
    }

    fn s_add(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::SAdd {
            key: key.to_string(),
            members,
            result: result.clone(),
        });
        result
    }

    fn s_rem(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::SRem {
            key: key.to_string(),
            members,
            result: result.clone(),
        });
        result
    }

    fn z_add(&mut self, key: &str, member: Value, score: f64) -> BatchResult<()> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::ZAdd {
            key: key.to_string(),
            member,
            score,
            result: result.clone(),
        });
        result
    }

    fn z_rem(&mut self, key: &str, member: Value) -> BatchResult<()> {
        let result = BatchResult::new();
        self.ops.push(DeferredOp::ZRem {
            key: key.to_string(),
            member,
            result: result.clone(),
        });
        result
    }

    async fn exec(self: Box<Self>) -> Result<()> {
        let mut first_error = None;
        let mut record = |err: &Error| {
            if first_error.is_none() {
                first_error = Some(err.clone());
            }
        };

        for op in self.ops {
            match op {
                DeferredOp::Get { key, result } => {
                    let r = self.backend.get(&key).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::Delete { key, result } => {
                    let r = self.backend.delete(&key).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::Set { key, value, result } => {
                    let r = self.backend.set(&key, value).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::SMembers { key, result } => {
                    let r = self.backend.s_members(&key).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::SAdd { key, members, result } => {
                    let r = self.backend.s_add(&key, members).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::SRem { key, members, result } => {
                    let r = self.backend.s_rem(&key, members).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::ZAdd { key, member, score, result } => {
                    let r = self.backend.z_add(&key, member, score).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
                DeferredOp::ZRem { key, member, result } => {
                    let r = self.backend.z_rem(&key, member).await;
                    if let Err(err) = &r {
                        record(err);
                    }
                    result.fill(r);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_report_unexecuted_batch_results() {
        // given
        let result: BatchResult<Option<Value>> = BatchResult::new();

        // then
        assert!(matches!(result.result(), Err(Error::Protocol(_))));
    }

    #[test]
    fn should_keep_the_first_fill() {
        // given
        let result: BatchResult<bool> = BatchResult::new();

        // when
        result.fill(Ok(true));
        result.fill(Ok(false));

        // then
        assert!(result.result().unwrap());
    }
}
