//! Transparent read-through cache over any backend.
//!
//! Reads are memoised permanently, or until a write through the cache
//! invalidates them. The cache entry for a key is a tagged variant over the
//! key's read shapes; sorted-set reads memoise per query under a fingerprint
//! of the operation and its arguments, so distinct counts, ranges, and score
//! lookups against one key cache independently.
//!
//! # Eventually consistent views
//!
//! [`ReadCache::with_eventually_consistent_reads`] returns a view backed by
//! a second, independent map. Reads through that view never touch the strong
//! map, and its writes never invalidate the strong map, so one process can
//! share a strong cache while individual call sites opt into a cheaper,
//! staleness-tolerant view.

mod atomic;
mod batch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use keyvalue::util::concat_keys;
use keyvalue::{
    AtomicWriteOperation, BatchOperation, CasTransform, Result, ScoredMember, Value,
};

pub(crate) enum CacheEntry {
    Scalar(Result<Option<Value>>),
    SetMembers(Result<Vec<Value>>),
    /// Query fingerprint → memoised sorted-set read.
    Sorted(HashMap<Vec<u8>, SortedEntry>),
}

pub(crate) enum SortedEntry {
    Score(Result<Option<f64>>),
    Count(Result<usize>),
    Range { members: Result<Vec<ScoredMember>>, limit: usize },
}

/// Whether a cached range populated at `cached_limit` may serve a query at
/// `limit`. An unbounded entry dominates every limit; an unbounded query is
/// only served by an unbounded entry.
fn range_limit_satisfies(cached_limit: usize, limit: usize) -> bool {
    cached_limit == 0 || (limit != 0 && limit <= cached_limit)
}

fn truncated(members: &[ScoredMember], limit: usize) -> Vec<ScoredMember> {
    match limit {
        0 => members.to_vec(),
        n => members.iter().take(n).cloned().collect(),
    }
}

/// A read-through cache. Implements [`keyvalue::Backend`] by delegation.
#[derive(Clone)]
pub struct ReadCache {
    backend: Arc<dyn keyvalue::Backend>,
    strong: Arc<DashMap<String, CacheEntry>>,
    eventual: Arc<DashMap<String, CacheEntry>>,
    eventually_consistent: bool,
}

impl ReadCache {
    pub fn new(backend: Arc<dyn keyvalue::Backend>) -> Self {
        Self {
            backend,
            strong: Arc::new(DashMap::new()),
            eventual: Arc::new(DashMap::new()),
            eventually_consistent: false,
        }
    }

    /// Returns a cache that shares this cache's memoisation maps but reads
    /// through a different backend.
    pub fn with_backend(&self, backend: Arc<dyn keyvalue::Backend>) -> Self {
        Self {
            backend,
            strong: Arc::clone(&self.strong),
            eventual: Arc::clone(&self.eventual),
            eventually_consistent: self.eventually_consistent,
        }
    }

    /// Returns a view suitable for eventually consistent reads. Reads on the
    /// returned cache do not impact the reads of ancestors with strong
    /// consistency, and may keep returning entries that writes elsewhere
    /// have already invalidated.
    pub fn with_eventually_consistent_reads(&self) -> Self {
        if self.eventually_consistent {
            return self.clone();
        }
        Self {
            backend: Arc::clone(&self.backend),
            strong: Arc::clone(&self.strong),
            eventual: Arc::clone(&self.eventual),
            eventually_consistent: true,
        }
    }

    pub(crate) fn map(&self) -> &DashMap<String, CacheEntry> {
        if self.eventually_consistent {
            &self.eventual
        } else {
            &self.strong
        }
    }

    /// Drops whatever is cached for the key in this view.
    pub fn invalidate(&self, key: &str) {
        self.map().remove(key);
    }

    pub(crate) fn cached_scalar(&self, key: &str) -> Option<Result<Option<Value>>> {
        match self.map().get(key).as_deref() {
            Some(CacheEntry::Scalar(result)) => Some(result.clone()),
            _ => None,
        }
    }

    pub(crate) fn store_scalar(&self, key: &str, result: Result<Option<Value>>) {
        self.map().insert(key.to_string(), CacheEntry::Scalar(result));
    }

    pub(crate) fn cached_set_members(&self, key: &str) -> Option<Result<Vec<Value>>> {
        match self.map().get(key).as_deref() {
            Some(CacheEntry::SetMembers(result)) => Some(result.clone()),
            _ => None,
        }
    }

    pub(crate) fn store_set_members(&self, key: &str, result: Result<Vec<Value>>) {
        self.map().insert(key.to_string(), CacheEntry::SetMembers(result));
    }

    fn cached_sorted<T>(
        &self,
        key: &str,
        fingerprint: &[u8],
        read: impl Fn(&SortedEntry) -> Option<T>,
    ) -> Option<T> {
        match self.map().get(key).as_deref() {
            Some(CacheEntry::Sorted(subcache)) => subcache.get(fingerprint).and_then(read),
            _ => None,
        }
    }

    fn store_sorted(&self, key: &str, fingerprint: Vec<u8>, entry: SortedEntry) {
        let mut slot = self
            .map()
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::Sorted(HashMap::new()));
        if !matches!(slot.value(), CacheEntry::Sorted(_)) {
            *slot.value_mut() = CacheEntry::Sorted(HashMap::new());
        }
        if let CacheEntry::Sorted(subcache) = slot.value_mut() {
            subcache.insert(fingerprint, entry);
        }
    }

    async fn cached_range(
        &self,
        key: &str,
        fingerprint: Vec<u8>,
        limit: usize,
        fetch: impl std::future::Future<Output = Result<Vec<ScoredMember>>>,
    ) -> Result<Vec<ScoredMember>> {
        let cached = self.cached_sorted(key, &fingerprint, |entry| match entry {
            SortedEntry::Range { members, limit: cached_limit }
                if range_limit_satisfies(*cached_limit, limit) =>
            {
                Some(members.as_ref().map(|m| truncated(m, limit)).map_err(Clone::clone))
            }
            _ => None,
        });
        if let Some(result) = cached {
            return result;
        }

        let members = fetch.await;
        self.store_sorted(
            key,
            fingerprint,
            SortedEntry::Range { members: members.clone(), limit },
        );
        members
    }
}

fn float_key(f: f64) -> [u8; 8] {
    f.to_bits().to_be_bytes()
}

#[async_trait]
impl keyvalue::Backend for ReadCache {
    fn batch(&self) -> Box<dyn BatchOperation + '_> {
        Box::new(batch::CachedBatchOperation::new(self, self.backend.batch()))
    }

    fn atomic_write(&self) -> Box<dyn AtomicWriteOperation + '_> {
        Box::new(atomic::CachedAtomicWrite::new(self, self.backend.atomic_write()))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(cached) = self.cached_scalar(key) {
            return cached;
        }
        let result = self.backend.get(key).await;
        self.store_scalar(key, result.clone());
        result
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let result = self.backend.set(key, value).await;
        self.invalidate(key);
        result
    }

    async fn set_nx(&self, key: &str, value: Value) -> Result<bool> {
        let result = self.backend.set_nx(key, value).await;
        self.invalidate(key);
        result
    }

    async fn set_xx(&self, key: &str, value: Value) -> Result<bool> {
        let result = self.backend.set_xx(key, value).await;
        self.invalidate(key);
        result
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = self.backend.delete(key).await;
        self.invalidate(key);
        result
    }

    async fn cas(&self, key: &str, transform: CasTransform<'_>) -> Result<bool> {
        let result = self.backend.cas(key, transform).await;
        self.invalidate(key);
        result
    }

    async fn add_int(&self, key: &str, n: i64) -> Result<i64> {
        let result = self.backend.add_int(key, n).await;
        self.invalidate(key);
        result
    }

    async fn s_add(&self, key: &str, members: Vec<Value>) -> Result<()> {
        let result = self.backend.s_add(key, members).await;
        self.invalidate(key);
        result
    }

    async fn s_rem(&self, key: &str, members: Vec<Value>) -> Result<()> {
        let result = self.backend.s_rem(key, members).await;
        self.invalidate(key);
        result
    }

    async fn s_members(&self, key: &str) -> Result<Vec<Value>> {
        if let Some(cached) = self.cached_set_members(key) {
            return cached;
        }
        let result = self.backend.s_members(key).await;
        self.store_set_members(key, result.clone());
        result
    }

    async fn z_add(&self, key: &str, member: Value, score: f64) -> Result<()> {
        let result = self.backend.z_add(key, member, score).await;
        self.invalidate(key);
        result
    }

    async fn z_score(&self, key: &str, member: Value) -> Result<Option<f64>> {
        let fingerprint = concat_keys([b"zs".as_slice(), &member.as_bytes()]).to_vec();
        let cached = self.cached_sorted(key, &fingerprint, |entry| match entry {
            SortedEntry::Score(result) => Some(result.clone()),
            _ => None,
        });
        if let Some(result) = cached {
            return result;
        }

        let result = self.backend.z_score(key, member).await;
        self.store_sorted(key, fingerprint, SortedEntry::Score(result.clone()));
        result
    }

    async fn z_rem(&self, key: &str, member: Value) -> Result<()> {
        let result = self.backend.z_rem(key, member).await;
        self.invalidate(key);
        result
    }

    async fn z_incr_by(&self, key: &str, member: Value, delta: f64) -> Result<f64> {
        let result = self.backend.z_incr_by(key, member, delta).await;
        self.invalidate(key);
        result
    }

    async fn z_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        Ok(keyvalue::scored_values(
            self.z_range_by_score_with_scores(key, min, max, limit).await?,
        ))
    }

    async fn z_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        let fingerprint =
            concat_keys([b"zrbs".as_slice(), &float_key(min), &float_key(max)]).to_vec();
        self.cached_range(
            key,
            fingerprint,
            limit,
            self.backend.z_range_by_score_with_scores(key, min, max, limit),
        )
        .await
    }

    async fn z_rev_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        Ok(keyvalue::scored_values(
            self.z_rev_range_by_score_with_scores(key, min, max, limit).await?,
        ))
    }

    async fn z_rev_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        let fingerprint =
            concat_keys([b"zrrbs".as_slice(), &float_key(min), &float_key(max)]).to_vec();
        self.cached_range(
            key,
            fingerprint,
            limit,
            self.backend.z_rev_range_by_score_with_scores(key, min, max, limit),
        )
        .await
    }

    async fn z_count(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        let fingerprint =
            concat_keys([b"zc".as_slice(), &float_key(min), &float_key(max)]).to_vec();
        let cached = self.cached_sorted(key, &fingerprint, |entry| match entry {
            SortedEntry::Count(result) => Some(result.clone()),
            _ => None,
        });
        if let Some(result) = cached {
            return result;
        }

        let result = self.backend.z_count(key, min, max).await;
        self.store_sorted(key, fingerprint, SortedEntry::Count(result.clone()));
        result
    }

    async fn z_lex_count(&self, key: &str, min: &str, max: &str) -> Result<usize> {
        let fingerprint = concat_keys([b"zlc".as_slice(), min.as_bytes(), max.as_bytes()]).to_vec();
        let cached = self.cached_sorted(key, &fingerprint, |entry| match entry {
            SortedEntry::Count(result) => Some(result.clone()),
            _ => None,
        });
        if let Some(result) = cached {
            return result;
        }

        let result = self.backend.z_lex_count(key, min, max).await;
        self.store_sorted(key, fingerprint, SortedEntry::Count(result.clone()));
        result
    }

    async fn z_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let fingerprint = concat_keys([b"zrbl".as_slice(), min.as_bytes(), max.as_bytes()]).to_vec();
        let members = self
            .cached_range(key, fingerprint, limit, async {
                let members = self.backend.z_range_by_lex(key, min, max, limit).await?;
                Ok(members
                    .into_iter()
                    .map(|value| ScoredMember { score: 0.0, value })
                    .collect())
            })
            .await?;
        Ok(keyvalue::scored_values(members))
    }

    async fn z_rev_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let fingerprint = concat_keys([b"zrrbl".as_slice(), min.as_bytes(), max.as_bytes()]).to_vec();
        let members = self
            .cached_range(key, fingerprint, limit, async {
                let members = self.backend.z_rev_range_by_lex(key, min, max, limit).await?;
                Ok(members
                    .into_iter()
                    .map(|value| ScoredMember { score: 0.0, value })
                    .collect())
            })
            .await?;
        Ok(keyvalue::scored_values(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_let_unbounded_entries_dominate() {
        assert!(range_limit_satisfies(0, 0));
        assert!(range_limit_satisfies(0, 5));
        assert!(range_limit_satisfies(5, 5));
        assert!(range_limit_satisfies(5, 3));
        assert!(!range_limit_satisfies(5, 0));
        assert!(!range_limit_satisfies(5, 6));
    }

    #[test]
    fn should_truncate_served_prefixes_to_the_query_limit() {
        let members: Vec<ScoredMember> = (0..4)
            .map(|i| ScoredMember { score: i as f64, value: Value::from(i as i64) })
            .collect();
        assert_eq!(truncated(&members, 2).len(), 2);
        assert_eq!(truncated(&members, 0).len(), 4);
    }
}
