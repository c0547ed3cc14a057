//! A delegating backend that counts how often it is consulted.
//!
//! Used to prove that cache hits never reach the underlying store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use keyvalue::{
    AtomicWriteOperation, Backend, BatchOperation, BatchResult, CasTransform, Result,
    ScoredMember, Value,
};

/// Wraps a backend and counts reads, writes, and batch executions.
pub struct CountingBackend {
    inner: Arc<dyn Backend>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    batch_execs: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            batch_execs: AtomicUsize::new(0),
        }
    }

    /// Read operations that reached the underlying backend.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Write operations that reached the underlying backend.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Batch executions that reached the underlying backend.
    pub fn batch_execs(&self) -> usize {
        self.batch_execs.load(Ordering::SeqCst)
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingBatch<'a> {
    inner: Box<dyn BatchOperation + 'a>,
    execs: &'a AtomicUsize,
}

#[async_trait]
impl BatchOperation for CountingBatch<'_> {
    fn get(&mut self, key: &str) -> BatchResult<Option<Value>> {
        self.inner.get(key)
    }

    fn delete(&mut self, key: &str) -> BatchResult<bool> {
        self.inner.delete(key)
    }

    fn set(&mut self, key: &str, value: Value) -> BatchResult<()> {
        self.inner.set(key, value)
    }

    fn s_members(&mut self, key: &str) -> BatchResult<Vec<Value>> {
        self.inner.s_members(key)
    }

    fn s_add(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        self.inner.s_add(key, members)
    }

    fn s_rem(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        self.inner.s_rem(key, members)
    }

    fn z_add(&mut self, key: &str, member: Value, score: f64) -> BatchResult<()> {
        self.inner.z_add(key, member, score)
    }

    fn z_rem(&mut self, key: &str, member: Value) -> BatchResult<()> {
        self.inner.z_rem(key, member)
    }

    async fn exec(self: Box<Self>) -> Result<()> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        let this = *self;
        this.inner.exec().await
    }
}

#[async_trait]
impl Backend for CountingBackend {
    fn batch(&self) -> Box<dyn BatchOperation + '_> {
        Box::new(CountingBatch { inner: self.inner.batch(), execs: &self.batch_execs })
    }

    fn atomic_write(&self) -> Box<dyn AtomicWriteOperation + '_> {
        self.inner.atomic_write()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read();
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.write();
        self.inner.set(key, value).await
    }

    async fn set_nx(&self, key: &str, value: Value) -> Result<bool> {
        self.write();
        self.inner.set_nx(key, value).await
    }

    async fn set_xx(&self, key: &str, value: Value) -> Result<bool> {
        self.write();
        self.inner.set_xx(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.write();
        self.inner.delete(key).await
    }

    async fn cas(&self, key: &str, transform: CasTransform<'_>) -> Result<bool> {
        self.write();
        self.inner.cas(key, transform).await
    }

    async fn add_int(&self, key: &str, n: i64) -> Result<i64> {
        self.write();
        self.inner.add_int(key, n).await
    }

    async fn s_add(&self, key: &str, members: Vec<Value>) -> Result<()> {
        self.write();
        self.inner.s_add(key, members).await
    }

    async fn s_rem(&self, key: &str, members: Vec<Value>) -> Result<()> {
        self.write();
        self.inner.s_rem(key, members).await
    }

    async fn s_members(&self, key: &str) -> Result<Vec<Value>> {
        self.read();
        self.inner.s_members(key).await
    }

    async fn z_add(&self, key: &str, member: Value, score: f64) -> Result<()> {
        self.write();
        self.inner.z_add(key, member, score).await
    }

    async fn z_score(&self, key: &str, member: Value) -> Result<Option<f64>> {
        self.read();
        self.inner.z_score(key, member).await
    }

    async fn z_rem(&self, key: &str, member: Value) -> Result<()> {
        self.write();
        self.inner.z_rem(key, member).await
    }

    async fn z_incr_by(&self, key: &str, member: Value, delta: f64) -> Result<f64> {
        self.write();
        self.inner.z_incr_by(key, member, delta).await
    }

    async fn z_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.read();
        self.inner.z_range_by_score(key, min, max, limit).await
    }

    async fn z_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        self.read();
        self.inner.z_range_by_score_with_scores(key, min, max, limit).await
    }

    async fn z_rev_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.read();
        self.inner.z_rev_range_by_score(key, min, max, limit).await
    }

    async fn z_rev_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        self.read();
        self.inner.z_rev_range_by_score_with_scores(key, min, max, limit).await
    }

    async fn z_count(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        self.read();
        self.inner.z_count(key, min, max).await
    }

    async fn z_lex_count(&self, key: &str, min: &str, max: &str) -> Result<usize> {
        self.read();
        self.inner.z_lex_count(key, min, max).await
    }

    async fn z_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.read();
        self.inner.z_range_by_lex(key, min, max, limit).await
    }

    async fn z_rev_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.read();
        self.inner.z_rev_range_by_lex(key, min, max, limit).await
    }
}
