//! The store contract.

use async_trait::async_trait;

use crate::atomic::AtomicWriteOperation;
use crate::batch::BatchOperation;
use crate::error::Result;
use crate::model::{ScoredMember, Value};

/// A compare-and-swap transform.
///
/// Invoked with the current value (or `None` when the key is absent).
/// Returning `Ok(Some(new))` requests the swap, `Ok(None)` requests no
/// change, and an error aborts the operation with no write.
pub type CasTransform<'a> = Box<dyn FnOnce(Option<&Value>) -> Result<Option<Value>> + Send + 'a>;

/// The store contract implemented by every backend.
///
/// A key holds at most one shape at a time: a scalar, an unordered set, or a
/// sorted set. Shape is determined by first write; mixing shapes on one key
/// is undefined behavior that backends need not detect.
///
/// Range limits of `0` mean unbounded. Numeric range bounds are inclusive,
/// with the infinities first-class; lexical bounds use the delimiter grammar
/// of [`LexBound`](crate::LexBound). A range whose minimum sorts above its
/// maximum is empty, not an error.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Batches simple operations for better performance potential. Use this
    /// only for possible performance benefits: read isolation is
    /// backend-defined and atomicity must not be assumed.
    fn batch(&self) -> Box<dyn BatchOperation + '_>;

    /// Begins a group of up to
    /// [`MAX_ATOMIC_WRITE_OPERATIONS`](crate::MAX_ATOMIC_WRITE_OPERATIONS)
    /// write operations that execute atomically, failing entirely if any
    /// conditional operation's predicate does not hold.
    fn atomic_write(&self) -> Box<dyn AtomicWriteOperation + '_>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Sets the key only if it does not already exist. Returns whether the
    /// value was set.
    async fn set_nx(&self, key: &str, value: Value) -> Result<bool>;

    /// Sets the key only if it already exists. Returns whether the value was
    /// set.
    async fn set_xx(&self, key: &str, value: Value) -> Result<bool>;

    /// Deletes the key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Performs a compare-and-swap: reads the key, applies `transform`, and
    /// writes the result only if the stored value has not changed in the
    /// meantime. Returns `false` when another writer intervened; retrying is
    /// the caller's business.
    async fn cas(&self, key: &str, transform: CasTransform<'_>) -> Result<bool>;

    /// Adds `n` to an integer value, or sets the key to `n` if it does not
    /// exist. Returns the new value.
    async fn add_int(&self, key: &str, n: i64) -> Result<i64>;

    /// Adds members to an unordered set, creating it if needed. Sets are
    /// ideal for small sizes and fast read access; sorted sets should be
    /// considered instead for large, write-heavy applications.
    async fn s_add(&self, key: &str, members: Vec<Value>) -> Result<()>;

    /// Removes members from an unordered set. Removing the last member is
    /// indistinguishable from deleting the key.
    async fn s_rem(&self, key: &str, members: Vec<Value>) -> Result<()>;

    /// Returns the members of an unordered set, in no particular order.
    async fn s_members(&self, key: &str) -> Result<Vec<Value>>;

    /// Adds a member to a sorted set, or replaces its score.
    async fn z_add(&self, key: &str, member: Value, score: f64) -> Result<()>;

    /// Returns the score of a sorted-set member, or `None` for non-members.
    async fn z_score(&self, key: &str, member: Value) -> Result<Option<f64>>;

    /// Removes a member from a sorted set.
    async fn z_rem(&self, key: &str, member: Value) -> Result<()>;

    /// Adds `delta` to a member's score, or sets it for a new member.
    /// Returns the new score.
    async fn z_incr_by(&self, key: &str, member: Value, delta: f64) -> Result<f64>;

    /// Returns members with scores in `[min, max]`, ascending by score with
    /// ties broken by member bytes.
    async fn z_range_by_score(&self, key: &str, min: f64, max: f64, limit: usize)
        -> Result<Vec<Value>>;

    async fn z_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>>;

    /// Returns members with scores in `[min, max]`, descending.
    async fn z_rev_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>>;

    async fn z_rev_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>>;

    /// Counts members with scores in `[min, max]`.
    async fn z_count(&self, key: &str, min: f64, max: f64) -> Result<usize>;

    /// Counts members between the lexical bounds `min` and `max`. All
    /// members of the set must have been added with a zero score.
    async fn z_lex_count(&self, key: &str, min: &str, max: &str) -> Result<usize>;

    /// Returns members between the lexical bounds `min` and `max` in
    /// ascending byte order. All members of the set must have been added
    /// with a zero score.
    async fn z_range_by_lex(&self, key: &str, min: &str, max: &str, limit: usize)
        -> Result<Vec<Value>>;

    /// Returns members between the lexical bounds `min` and `max` in
    /// descending byte order.
    async fn z_rev_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>>;
}
