//! Batched dispatch through the cache.
//!
//! Reads consult the cache first; only misses reach the underlying batch.
//! When every read hits and nothing needs invalidating, the underlying
//! batch is never executed. Misses are resolved into the cache before the
//! batch's written keys are invalidated.

use async_trait::async_trait;

use keyvalue::{BatchOperation, BatchResult, Value};

use crate::ReadCache;

enum CacheRead {
    Get { key: String, dest: BatchResult<Option<Value>> },
    SetMembers { key: String, dest: BatchResult<Vec<Value>> },
}

struct GetMiss {
    key: String,
    dest: BatchResult<Option<Value>>,
    source: BatchResult<Option<Value>>,
}

struct SetMembersMiss {
    key: String,
    dest: BatchResult<Vec<Value>>,
    source: BatchResult<Vec<Value>>,
}

pub(crate) struct CachedBatchOperation<'a> {
    cache: &'a ReadCache,
    inner: Box<dyn BatchOperation + 'a>,
    reads: Vec<CacheRead>,
    invalidations: Vec<String>,
}

impl<'a> CachedBatchOperation<'a> {
    pub(crate) fn new(cache: &'a ReadCache, inner: Box<dyn BatchOperation + 'a>) -> Self {
        Self { cache, inner, reads: Vec::new(), invalidations: Vec::new() }
    }
}

#[async_trait]
impl BatchOperation for CachedBatchOperation<'_> {
    fn get(&mut self, key: &str) -> BatchResult<Option<Value>> {
        let dest = BatchResult::new();
        self.reads.push(CacheRead::Get { key: key.to_string(), dest: dest.clone() });
        dest
    }

    fn delete(&mut self, key: &str) -> BatchResult<bool> {
        self.invalidations.push(key.to_string());
        self.inner.delete(key)
    }

    fn set(&mut self, key: &str, value: Value) -> BatchResult<()> {
        self.invalidations.push(key.to_string());
        self.inner.set(key, value)
    }

    fn s_members(&mut self, key: &str) -> BatchResult<Vec<Value>> {
        let dest = BatchResult::new();
        self.reads.push(CacheRead::SetMembers { key: key.to_string(), dest: dest.clone() });
        dest
    }

    fn s_add(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        self.invalidations.push(key.to_string());
        self.inner.s_add(key, members)
    }

    fn s_rem(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        self.invalidations.push(key.to_string());
        self.inner.s_rem(key, members)
    }

    fn z_add(&mut self, key: &str, member: Value, score: f64) -> BatchResult<()> {
        self.invalidations.push(key.to_string());
        self.inner.z_add(key, member, score)
    }

    fn z_rem(&mut self, key: &str, member: Value) -> BatchResult<()> {
        self.invalidations.push(key.to_string());
        self.inner.z_rem(key, member)
    }

    async fn exec(self: Box<Self>) -> keyvalue::Result<()> {
        let this = *self;
        let mut inner = this.inner;

        let mut first_error = None;
        let mut get_misses = Vec::new();
        let mut smembers_misses = Vec::new();

        for read in this.reads {
            match read {
                CacheRead::Get { key, dest } => match this.cache.cached_scalar(&key) {
                    Some(result) => {
                        if let Err(err) = &result {
                            if first_error.is_none() {
                                first_error = Some(err.clone());
                            }
                        }
                        dest.fill(result);
                    }
                    None => {
                        let source = inner.get(&key);
                        get_misses.push(GetMiss { key, dest, source });
                    }
                },
                CacheRead::SetMembers { key, dest } => match this.cache.cached_set_members(&key) {
                    Some(result) => {
                        if let Err(err) = &result {
                            if first_error.is_none() {
                                first_error = Some(err.clone());
                            }
                        }
                        dest.fill(result);
                    }
                    None => {
                        let source = inner.s_members(&key);
                        smembers_misses.push(SetMembersMiss { key, dest, source });
                    }
                },
            }
        }

        if first_error.is_some()
            || (get_misses.is_empty()
                && smembers_misses.is_empty()
                && this.invalidations.is_empty())
        {
            return match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }

        let exec_result = inner.exec().await;

        for miss in get_misses {
            let result = miss.source.result();
            this.cache.store_scalar(&miss.key, result.clone());
            miss.dest.fill(result);
        }
        for miss in smembers_misses {
            let result = miss.source.result();
            this.cache.store_set_members(&miss.key, result.clone());
            miss.dest.fill(result);
        }
        for key in &this.invalidations {
            this.cache.invalidate(key);
        }

        exec_result
    }
}
