//! Atomic write groups over the service's transactional write primitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use tracing::debug;

use keyvalue::{
    AtomicWriteOperation, AtomicWriteResult, Error, Result, Value, MAX_ATOMIC_WRITE_OPERATIONS,
};

use crate::backend::{attribute_value, composite_key, new_item, Backend, SCALAR_SORT_KEY};
use crate::client::{Condition, TransactItem, TransactWriteInput};

/// Transient internal errors are retried this many times with quadratic
/// backoff before surfacing.
const INTERNAL_ERROR_RETRIES: u32 = 3;

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
    items: Vec<TransactItem>,
    results: Vec<Arc<TxResult>>,
}

impl<'a> AtomicWrite<'a> {
    pub(crate) fn new(backend: &'a Backend) -> Self {
        Self { backend, items: Vec::new(), results: Vec::new() }
    }

    fn push(&mut self, item: TransactItem) -> Arc<dyn AtomicWriteResult> {
        let result = Arc::new(TxResult { failed: AtomicBool::new(false) });
        self.items.push(item);
        self.results.push(result.clone());
        result
    }
}

#[async_trait]
impl AtomicWriteOperation for AtomicWrite<'_> {
    fn set_nx(&mut self, key: &str, value: Value) -> Arc<dyn AtomicWriteResult> {
        self.push(TransactItem::Put {
            item: new_item(key, SCALAR_SORT_KEY, vec![("v", attribute_value(&value))]),
            conditions: vec![Condition::AttributeNotExists("v".to_string())],
        })
    }

    fn cas(&mut self, key: &str, old: Value, new: Value) -> Arc<dyn AtomicWriteResult> {
        self.push(TransactItem::Put {
            item: new_item(key, SCALAR_SORT_KEY, vec![("v", attribute_value(&new))]),
            conditions: vec![Condition::Equals("v".to_string(), attribute_value(&old))],
        })
    }

    fn delete(&mut self, key: &str) -> Arc<dyn AtomicWriteResult> {
        self.push(TransactItem::Delete { key: composite_key(key, SCALAR_SORT_KEY) })
    }

    async fn exec(self: Box<Self>) -> Result<bool> {
        if self.items.len() > MAX_ATOMIC_WRITE_OPERATIONS {
            return Err(Error::TooManyOperations {
                count: self.items.len(),
                max: MAX_ATOMIC_WRITE_OPERATIONS,
            });
        }

        let mut token = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut token);
        let token = URL_SAFE_NO_PAD.encode(token);

        let mut attempts = 0;
        loop {
            let input = TransactWriteInput {
                table_name: self.backend.table_name.clone(),
                client_request_token: token.clone(),
                items: self.items.clone(),
            };

            let err = match self.backend.client.transact_write_items(input).await {
                Ok(_) => return Ok(true),
                Err(err) => err,
            };

            // Internal errors tend to happen if the table was recently
            // recreated; retry the request a few times.
            if attempts < INTERNAL_ERROR_RETRIES && err.error.is_internal_server_error() {
                attempts += 1;
                debug!(attempt = attempts, "transactional write hit an internal error; retrying");
                tokio::time::sleep(Duration::from_millis(100) * attempts * attempts).await;
                continue;
            }

            if !err.error.is_transaction_canceled() {
                return Err(Error::transport("table service transactional write", err));
            }

            let mut has_error = false;
            let mut has_conditional_failure = false;
            for (i, reason) in err.cancellation_reasons.iter().enumerate() {
                let Some(reason) = reason else { continue };
                if reason.code == "ConditionalCheckFailed" {
                    has_conditional_failure = true;
                    if let Some(result) = self.results.get(i) {
                        result.failed.store(true, Ordering::SeqCst);
                    }
                } else {
                    has_error = true;
                }
            }
            if has_error || !has_conditional_failure {
                return Err(Error::transport("table service transactional write", err));
            }
            return Ok(false);
        }
    }
}
