//! Atomic write groups for the in-memory backend.
//!
//! Predicates are evaluated and writes applied under the backend's mutex, so
//! the group is serialized against every other operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use keyvalue::{
    AtomicWriteOperation, AtomicWriteResult, Error, Result, Value,
    MAX_ATOMIC_WRITE_OPERATIONS,
};

use crate::{Backend, Entry};

enum TxOp {
    SetNx { key: String, value: Value },
    Cas { key: String, old: Value, new: Value },
    Delete { key: String },
}

struct TxRecord {
    op: TxOp,
    result: Arc<TxResult>,
}

#[derive(Default)]
struct TxResult {
    failed: AtomicBool,
}

impl AtomicWriteResult for TxResult {
    fn conditional_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

pub(crate) struct AtomicWrite<'a> {
    backend: &'a Backend,
    ops: Vec<TxRecord>,
}

impl<'a> AtomicWrite<'a> {
    pub(crate) fn new(backend: &'a Backend) -> Self {
        Self { backend, ops: Vec::new() }
    }

    fn push(&mut self, op: TxOp) -> Arc<dyn AtomicWriteResult> {
        let result = Arc::new(TxResult::default());
        self.ops.push(TxRecord { op, result: result.clone() });
        result
    }
}

#[async_trait]
impl AtomicWriteOperation for AtomicWrite<'_> {
    fn set_nx(&mut self, key: &str, value: Value) -> Arc<dyn AtomicWriteResult> {
        self.push(TxOp::SetNx { key: key.to_string(), value })
    }

    fn cas(&mut self, key: &str, old: Value, new: Value) -> Arc<dyn AtomicWriteResult> {
        self.push(TxOp::Cas { key: key.to_string(), old, new })
    }

    fn delete(&mut self, key: &str) -> Arc<dyn AtomicWriteResult> {
        self.push(TxOp::Delete { key: key.to_string() })
    }

    async fn exec(self: Box<Self>) -> Result<bool> {
        if self.ops.len() > MAX_ATOMIC_WRITE_OPERATIONS {
            return Err(Error::TooManyOperations {
                count: self.ops.len(),
                max: MAX_ATOMIC_WRITE_OPERATIONS,
            });
        }

        let mut entries = self.backend.lock()?;

        let mut all_passed = true;
        for record in &self.ops {
            let passed = match &record.op {
                TxOp::SetNx { key, .. } => !entries.contains_key(key),
                TxOp::Cas { key, old, .. } => {
                    Backend::scalar(&entries, key).is_some_and(|current| current == *old)
                }
                TxOp::Delete { .. } => true,
            };
            record.result.failed.store(!passed, Ordering::SeqCst);
            if !passed {
                all_passed = false;
            }
        }

        if !all_passed {
            return Ok(false);
        }

        for record in self.ops {
            match record.op {
                TxOp::SetNx { key, value } => {
                    entries.insert(key, Entry::Scalar(value));
                }
                TxOp::Cas { key, new, .. } => {
                    entries.insert(key, Entry::Scalar(new));
                }
                TxOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }

        Ok(true)
    }
}
