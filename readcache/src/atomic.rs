//! Atomic write groups through the cache.
//!
//! The written keys are invalidated whether or not the group commits: a
//! failed equality predicate proves the cached value is stale just as surely
//! as a successful write does.

use std::sync::Arc;

use async_trait::async_trait;

use keyvalue::{AtomicWriteOperation, AtomicWriteResult, Result, Value};

use crate::ReadCache;

pub(crate) struct CachedAtomicWrite<'a> {
    cache: &'a ReadCache,
    inner: Box<dyn AtomicWriteOperation + 'a>,
    invalidations: Vec<String>,
}

impl<'a> CachedAtomicWrite<'a> {
    pub(crate) fn new(cache: &'a ReadCache, inner: Box<dyn AtomicWriteOperation + 'a>) -> Self {
        Self { cache, inner, invalidations: Vec::new() }
    }
}

#[async_trait]
impl AtomicWriteOperation for CachedAtomicWrite<'_> {
    fn set_nx(&mut self, key: &str, value: Value) -> Arc<dyn AtomicWriteResult> {
        self.invalidations.push(key.to_string());
        self.inner.set_nx(key, value)
    }

    fn cas(&mut self, key: &str, old: Value, new: Value) -> Arc<dyn AtomicWriteResult> {
        self.invalidations.push(key.to_string());
        self.inner.cas(key, old, new)
    }

    fn delete(&mut self, key: &str) -> Arc<dyn AtomicWriteResult> {
        self.invalidations.push(key.to_string());
        self.inner.delete(key)
    }

    async fn exec(self: Box<Self>) -> Result<bool> {
        let this = *self;
        let result = this.inner.exec().await;
        for key in &this.invalidations {
            this.cache.invalidate(key);
        }
        result
    }
}
