//! Atomic write groups compiled into a single server-side script.
//!
//! Each queued operation contributes a predicate expression and a write
//! expression. The generated script evaluates every predicate into a
//! `checks` table; if any check is false the script returns the table
//! without writing, otherwise it performs the writes in order and returns
//! the table. In the returned vector a slot is non-nil when its predicate
//! held and nil when it failed, which is how the client marks the handles.
//!
//! Operation expressions use `$@` for the operation's key and `$0`, `$1`, …
//! for its arguments; compilation rewrites these into positional `KEYS` /
//! `ARGV` references.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use keyvalue::{
    AtomicWriteOperation, AtomicWriteResult, Error, Result, Value, MAX_ATOMIC_WRITE_OPERATIONS,
};

use crate::backend::Backend;
use crate::client::Reply;

struct ScriptOp {
    key: String,
    condition: &'static str,
    write: &'static str,
    args: Vec<Bytes>,
    result: Arc<TxResult>,
}

struct TxResult {
    condition_passed: AtomicBool,
}

impl AtomicWriteResult for TxResult {
    fn conditional_failed(&self) -> bool {
        !self.condition_passed.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptAtomicWrite<'a> {
    backend: &'a Backend,
    ops: Vec<ScriptOp>,
}

impl<'a> ScriptAtomicWrite<'a> {
    pub(crate) fn new(backend: &'a Backend) -> Self {
        Self { backend, ops: Vec::new() }
    }

    fn push(
        &mut self,
        key: &str,
        condition: &'static str,
        write: &'static str,
        args: Vec<Bytes>,
    ) -> Arc<dyn AtomicWriteResult> {
        let result = Arc::new(TxResult { condition_passed: AtomicBool::new(false) });
        self.ops.push(ScriptOp {
            key: key.to_string(),
            condition,
            write,
            args,
            result: result.clone(),
        });
        result
    }

    pub(crate) fn compile(&self) -> (String, Vec<Bytes>, Vec<Bytes>) {
        let mut keys = Vec::with_capacity(self.ops.len());
        let mut args: Vec<Bytes> = Vec::new();
        let mut writes = Vec::with_capacity(self.ops.len());

        let mut script = vec!["local checks = {}".to_string()];
        for (i, op) in self.ops.iter().enumerate() {
            script.push(format!(
                "checks[{}] = {}",
                i + 1,
                preprocess_expression(op.condition, i + 1, args.len(), op.args.len())
            ));
            writes.push(preprocess_expression(op.write, i + 1, args.len(), op.args.len()));
            keys.push(Bytes::copy_from_slice(op.key.as_bytes()));
            args.extend(op.args.iter().cloned());
        }
        script.extend(
            ["for i, v in ipairs(checks) do", "if not v then", "return checks", "end", "end"]
                .map(str::to_string),
        );
        script.extend(writes);
        script.push("return checks".to_string());

        (script.join("\n"), keys, args)
    }
}

/// Rewrites `$@` into the operation's `KEYS` slot and `$N` into the
/// operation's `ARGV` positions.
fn preprocess_expression(
    expression: &str,
    key_index: usize,
    args_offset: usize,
    num_args: usize,
) -> String {
    let mut out = expression.replace("$@", &format!("KEYS[{}]", key_index));
    // Highest indexes first so "$1" cannot clobber part of "$10".
    for i in (0..num_args).rev() {
        out = out.replace(&format!("${}", i), &format!("ARGV[{}]", args_offset + i + 1));
    }
    out
}

#[async_trait]
impl AtomicWriteOperation for ScriptAtomicWrite<'_> {
    fn set_nx(&mut self, key: &str, value: Value) -> Arc<dyn AtomicWriteResult> {
        self.push(
            key,
            "redis.call('exists', $@) == 0",
            "redis.call('set', $@, $0)",
            vec![value.as_bytes()],
        )
    }

    fn cas(&mut self, key: &str, old: Value, new: Value) -> Arc<dyn AtomicWriteResult> {
        self.push(
            key,
            "redis.call('get', $@) == $0",
            "redis.call('set', $@, $1)",
            vec![old.as_bytes(), new.as_bytes()],
        )
    }

    fn delete(&mut self, key: &str) -> Arc<dyn AtomicWriteResult> {
        self.push(key, "true", "redis.call('del', $@)", Vec::new())
    }

    async fn exec(self: Box<Self>) -> Result<bool> {
        if self.ops.len() > MAX_ATOMIC_WRITE_OPERATIONS {
            return Err(Error::TooManyOperations {
                count: self.ops.len(),
                max: MAX_ATOMIC_WRITE_OPERATIONS,
            });
        }

        let (script, keys, args) = self.compile();
        let reply = self
            .backend
            .client
            .eval(&script, keys, args)
            .await
            .map_err(|e| Error::transport("script evaluation", e))?;

        let checks = match reply {
            Reply::Array(checks) => checks,
            Reply::Error(message) => {
                return Err(Error::transport(
                    "script evaluation",
                    crate::client::ClientError::new(message),
                ))
            }
            other => {
                return Err(Error::Protocol(format!("unexpected script return type: {:?}", other)))
            }
        };
        if checks.len() != self.ops.len() {
            return Err(Error::Protocol("not enough script return values".into()));
        }

        let mut all_passed = true;
        for (check, op) in checks.iter().zip(&self.ops) {
            if matches!(check, Reply::Nil) {
                all_passed = false;
            } else {
                op.result.condition_passed.store(true, Ordering::SeqCst);
            }
        }
        Ok(all_passed)
    }
}
