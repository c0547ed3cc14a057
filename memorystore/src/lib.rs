//! In-process reference backend.
//!
//! A single map guarded by one process-wide mutex: every operation holds the
//! lock for its whole duration, which makes the backend trivially
//! linearizable. The conformance suite uses it as the oracle against which
//! the remote backends are verified.
//!
//! Sorted sets are held twice: a member-to-score map for point lookups and
//! an ordered map keyed by the encoded score followed by the member bytes,
//! giving range scans in index order.

mod atomic;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use keyvalue::{
    score, AtomicWriteOperation, BatchOperation, CasTransform, Error, FallbackBatchOperation,
    LexBound, Result, ScoredMember, Value,
};

enum Entry {
    Scalar(Value),
    Set(HashSet<Bytes>),
    Sorted(SortedSet),
}

#[derive(Default)]
struct SortedSet {
    scores_by_member: HashMap<Bytes, f64>,
    /// `encode(score) ‖ member` → member.
    ordered: BTreeMap<Vec<u8>, Bytes>,
}

/// The in-memory backend.
#[derive(Default)]
pub struct Backend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Erases everything in the backend and makes it like-new. Intended for
    /// tests.
    pub fn reinitialize(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|e| Error::Protocol(format!("backend mutex poisoned: {}", e)))
    }

    fn scalar(entries: &HashMap<String, Entry>, key: &str) -> Option<Value> {
        match entries.get(key) {
            Some(Entry::Scalar(v)) => Some(v.clone()),
            _ => None,
        }
    }

    fn z_add_with(
        &self,
        key: &str,
        member: Value,
        f: impl FnOnce(Option<f64>) -> f64,
    ) -> Result<f64> {
        let mut entries = self.lock()?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Sorted(SortedSet::default()));
        if !matches!(entry, Entry::Sorted(_)) {
            *entry = Entry::Sorted(SortedSet::default());
        }
        let Entry::Sorted(set) = entry else { unreachable!() };

        let member = member.as_bytes();
        let previous = set.scores_by_member.get(&member).copied();
        if let Some(previous) = previous {
            set.ordered.remove(score::member_key(previous, &member).as_ref());
        }

        let new_score = f(previous);
        set.ordered
            .insert(score::member_key(new_score, &member).to_vec(), member.clone());
        set.scores_by_member.insert(member, new_score);
        Ok(new_score)
    }

    fn z_range(
        entries: &HashMap<String, Entry>,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Vec<ScoredMember> {
        let Some(Entry::Sorted(set)) = entries.get(key) else {
            return Vec::new();
        };

        let start = score::encode(min).to_vec();
        let max_prefix = score::encode(max);
        let mut members = Vec::new();
        for (index_key, member) in set.ordered.range(start..) {
            if limit > 0 && members.len() == limit {
                break;
            }
            if index_key[..score::ENCODED_LEN] > max_prefix[..] {
                break;
            }
            members.push(ScoredMember {
                score: score::decode(index_key),
                value: member.clone().into(),
            });
        }
        members
    }

    fn z_rev_range(
        entries: &HashMap<String, Entry>,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Vec<ScoredMember> {
        let Some(Entry::Sorted(set)) = entries.get(key) else {
            return Vec::new();
        };

        let min_key = score::encode(min);
        let end: Bound<Vec<u8>> = match score::successor(max) {
            Some(after) => Bound::Excluded(after.to_vec()),
            None => Bound::Unbounded,
        };
        let mut members = Vec::new();
        for (index_key, member) in set.ordered.range((Bound::Unbounded, end)).rev() {
            if limit > 0 && members.len() == limit {
                break;
            }
            if index_key.as_slice() < &min_key[..] {
                break;
            }
            members.push(ScoredMember {
                score: score::decode(index_key),
                value: member.clone().into(),
            });
        }
        members
    }

    fn z_lex_range(
        entries: &HashMap<String, Entry>,
        key: &str,
        min: &LexBound,
        max: &LexBound,
        limit: usize,
        reverse: bool,
    ) -> Vec<Value> {
        let Some(Entry::Sorted(set)) = entries.get(key) else {
            return Vec::new();
        };

        // Lexical mode requires every member to carry a zero score, so the
        // index keys share the encoded-zero prefix and order by member bytes.
        let prefix = score::encode(0.0);
        let bound_key = |b: &Bytes| {
            let mut key = Vec::with_capacity(prefix.len() + b.len());
            key.extend_from_slice(&prefix);
            key.extend_from_slice(b);
            key
        };

        let mut members = Vec::new();
        if reverse {
            let end: Bound<Vec<u8>> = match max {
                LexBound::PosInf => Bound::Unbounded,
                LexBound::NegInf => return members,
                LexBound::Inclusive(b) => Bound::Included(bound_key(b)),
                LexBound::Exclusive(b) => Bound::Excluded(bound_key(b)),
            };
            for (_, member) in set.ordered.range((Bound::Unbounded, end)).rev() {
                if limit > 0 && members.len() == limit {
                    break;
                }
                let past_min = match min {
                    LexBound::NegInf => false,
                    LexBound::PosInf => true,
                    LexBound::Inclusive(b) => member < b,
                    LexBound::Exclusive(b) => member <= b,
                };
                if past_min {
                    break;
                }
                members.push(member.clone().into());
            }
        } else {
            let start: Bound<Vec<u8>> = match min {
                LexBound::NegInf => Bound::Unbounded,
                LexBound::PosInf => return members,
                LexBound::Inclusive(b) => Bound::Included(bound_key(b)),
                LexBound::Exclusive(b) => Bound::Excluded(bound_key(b)),
            };
            for (_, member) in set.ordered.range((start, Bound::Unbounded)) {
                if limit > 0 && members.len() == limit {
                    break;
                }
                let past_max = match max {
                    LexBound::PosInf => false,
                    LexBound::NegInf => true,
                    LexBound::Inclusive(b) => member > b,
                    LexBound::Exclusive(b) => member >= b,
                };
                if past_max {
                    break;
                }
                members.push(member.clone().into());
            }
        }
        members
    }
}

#[async_trait]
impl keyvalue::Backend for Backend {
    fn batch(&self) -> Box<dyn BatchOperation + '_> {
        Box::new(FallbackBatchOperation::new(self))
    }

    fn atomic_write(&self) -> Box<dyn AtomicWriteOperation + '_> {
        Box::new(atomic::AtomicWrite::new(self))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.lock()?;
        Ok(Self::scalar(&entries, key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), Entry::Scalar(value));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Value) -> Result<bool> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::Scalar(value));
        Ok(true)
    }

    async fn set_xx(&self, key: &str, value: Value) -> Result<bool> {
        let mut entries = self.lock()?;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::Scalar(value));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        Ok(entries.remove(key).is_some())
    }

    async fn cas(&self, key: &str, transform: CasTransform<'_>) -> Result<bool> {
        let before = {
            let entries = self.lock()?;
            Self::scalar(&entries, key)
        };

        let new_value = match transform(before.as_ref())? {
            Some(v) => v,
            None => return Ok(true),
        };

        let mut entries = self.lock()?;
        let current = Self::scalar(&entries, key);
        let unchanged = match (&current, &before) {
            (Some(current), Some(before)) => current == before,
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::Scalar(new_value));
        Ok(true)
    }

    async fn add_int(&self, key: &str, n: i64) -> Result<i64> {
        let mut entries = self.lock()?;
        let new = match Self::scalar(&entries, key) {
            Some(v) => {
                let i = v.to_i64().ok_or_else(|| {
                    Error::InvalidArgument(format!("value at {:?} is not an integer", key))
                })?;
                i + n
            }
            None => n,
        };
        entries.insert(key.to_string(), Entry::Scalar(Value::Int(new)));
        Ok(new)
    }

    async fn s_add(&self, key: &str, members: Vec<Value>) -> Result<()> {
        if members.is_empty() {
            return Err(Error::InvalidArgument("s_add requires at least one member".into()));
        }
        let mut entries = self.lock()?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        if !matches!(entry, Entry::Set(_)) {
            *entry = Entry::Set(HashSet::new());
        }
        let Entry::Set(set) = entry else { unreachable!() };
        for member in members {
            set.insert(member.as_bytes());
        }
        Ok(())
    }

    async fn s_rem(&self, key: &str, members: Vec<Value>) -> Result<()> {
        if members.is_empty() {
            return Err(Error::InvalidArgument("s_rem requires at least one member".into()));
        }
        let mut entries = self.lock()?;
        let mut now_empty = false;
        if let Some(Entry::Set(set)) = entries.get_mut(key) {
            for member in members {
                set.remove(&member.as_bytes());
            }
            now_empty = set.is_empty();
        }
        // An empty set is indistinguishable from an absent key.
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn s_members(&self, key: &str) -> Result<Vec<Value>> {
        let entries = self.lock()?;
        match entries.get(key) {
            Some(Entry::Set(set)) => Ok(set.iter().map(|m| m.clone().into()).collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn z_add(&self, key: &str, member: Value, score: f64) -> Result<()> {
        self.z_add_with(key, member, |_| score)?;
        Ok(())
    }

    async fn z_score(&self, key: &str, member: Value) -> Result<Option<f64>> {
        let entries = self.lock()?;
        match entries.get(key) {
            Some(Entry::Sorted(set)) => {
                Ok(set.scores_by_member.get(&member.as_bytes()).copied())
            }
            _ => Ok(None),
        }
    }

    async fn z_rem(&self, key: &str, member: Value) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(Entry::Sorted(set)) = entries.get_mut(key) {
            let member = member.as_bytes();
            if let Some(previous) = set.scores_by_member.remove(&member) {
                set.ordered.remove(score::member_key(previous, &member).as_ref());
            }
        }
        Ok(())
    }

    async fn z_incr_by(&self, key: &str, member: Value, delta: f64) -> Result<f64> {
        self.z_add_with(key, member, |previous| previous.unwrap_or(0.0) + delta)
    }

    async fn z_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let entries = self.lock()?;
        Ok(keyvalue::scored_values(Self::z_range(&entries, key, min, max, limit)))
    }

    async fn z_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        let entries = self.lock()?;
        Ok(Self::z_range(&entries, key, min, max, limit))
    }

    async fn z_rev_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let entries = self.lock()?;
        Ok(keyvalue::scored_values(Self::z_rev_range(&entries, key, min, max, limit)))
    }

    async fn z_rev_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        let entries = self.lock()?;
        Ok(Self::z_rev_range(&entries, key, min, max, limit))
    }

    async fn z_count(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        let entries = self.lock()?;
        Ok(Self::z_range(&entries, key, min, max, 0).len())
    }

    async fn z_lex_count(&self, key: &str, min: &str, max: &str) -> Result<usize> {
        let min = LexBound::parse(min)?;
        let max = LexBound::parse(max)?;
        let entries = self.lock()?;
        Ok(Self::z_lex_range(&entries, key, &min, &max, 0, false).len())
    }

    async fn z_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let min = LexBound::parse(min)?;
        let max = LexBound::parse(max)?;
        let entries = self.lock()?;
        Ok(Self::z_lex_range(&entries, key, &min, &max, limit, false))
    }

    async fn z_rev_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let min = LexBound::parse(min)?;
        let max = LexBound::parse(max)?;
        let entries = self.lock()?;
        Ok(Self::z_lex_range(&entries, key, &min, &max, limit, true))
    }
}

#[cfg(test)]
mod tests {
    use keyvalue::Backend as _;

    use super::*;

    #[tokio::test]
    async fn should_not_read_collections_as_scalars() {
        // given
        let backend = Backend::new();
        backend.s_add("set", vec!["a".into()]).await.unwrap();

        // when
        let value = backend.get("set").await.unwrap();

        // then
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn should_reinitialize_to_empty() {
        // given
        let backend = Backend::new();
        backend.set("foo", "bar".into()).await.unwrap();

        // when
        backend.reinitialize();

        // then
        assert!(backend.get("foo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_replace_index_entry_when_score_changes() {
        // given
        let backend = Backend::new();
        backend.z_add("z", "m".into(), 1.0).await.unwrap();

        // when
        backend.z_add("z", "m".into(), 2.0).await.unwrap();

        // then
        let old = backend.z_range_by_score("z", 0.5, 1.5, 0).await.unwrap();
        assert!(old.is_empty());
        let new = backend.z_range_by_score("z", 1.5, 2.5, 0).await.unwrap();
        assert_eq!(new, vec![Value::from("m")]);
        assert_eq!(backend.z_score("z", "m".into()).await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn should_reject_empty_member_lists() {
        let backend = Backend::new();
        assert!(matches!(
            backend.s_add("set", vec![]).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
