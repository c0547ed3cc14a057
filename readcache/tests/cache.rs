use std::sync::Arc;

use keyvalue::{Backend as _, Value};
use readcache::ReadCache;
use storetest::CountingBackend;

fn counted() -> (Arc<CountingBackend>, ReadCache) {
    let backend = Arc::new(CountingBackend::new(Arc::new(memorystore::Backend::new())));
    let cache = ReadCache::new(backend.clone());
    (backend, cache)
}

#[tokio::test]
async fn should_serve_repeated_reads_from_the_cache() {
    // given
    let (backend, cache) = counted();
    cache.set("foo", "bar".into()).await.unwrap();

    // when
    assert_eq!(cache.get("foo").await.unwrap(), Some(Value::from("bar")));
    assert_eq!(cache.get("foo").await.unwrap(), Some(Value::from("bar")));
    assert_eq!(cache.get("foo").await.unwrap(), Some(Value::from("bar")));

    // then the backend was consulted once
    assert_eq!(backend.reads(), 1);
}

#[tokio::test]
async fn should_memoise_absent_reads_too() {
    // given
    let (backend, cache) = counted();

    // when
    assert_eq!(cache.get("missing").await.unwrap(), None);
    assert_eq!(cache.get("missing").await.unwrap(), None);

    // then
    assert_eq!(backend.reads(), 1);
}

#[tokio::test]
async fn should_refetch_after_writes() {
    // given
    let (backend, cache) = counted();
    cache.set("foo", "bar".into()).await.unwrap();
    cache.get("foo").await.unwrap();

    // when
    cache.set("foo", "baz".into()).await.unwrap();

    // then the next read goes back to the backend
    assert_eq!(cache.get("foo").await.unwrap(), Some(Value::from("baz")));
    assert_eq!(backend.reads(), 2);
}

#[tokio::test]
async fn should_cache_sorted_set_queries_independently() {
    // given
    let (backend, cache) = counted();
    cache.z_add("z", "a".into(), 1.0).await.unwrap();
    cache.z_add("z", "b".into(), 2.0).await.unwrap();

    // when distinct queries run twice each
    for _ in 0..2 {
        assert_eq!(cache.z_score("z", "a".into()).await.unwrap(), Some(1.0));
        assert_eq!(cache.z_count("z", 0.0, 10.0).await.unwrap(), 2);
        assert_eq!(
            cache.z_range_by_score("z", 0.0, 10.0, 0).await.unwrap(),
            vec![Value::from("a"), Value::from("b")]
        );
    }

    // then each distinct query hit the backend once
    assert_eq!(backend.reads(), 3);
}

#[tokio::test]
async fn should_serve_smaller_limits_from_a_cached_range() {
    // given
    let (backend, cache) = counted();
    for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        cache.z_add("z", member.into(), score).await.unwrap();
    }
    cache.z_range_by_score("z", 0.0, 10.0, 2).await.unwrap();
    assert_eq!(backend.reads(), 1);

    // when a smaller limit is requested
    let one = cache.z_range_by_score("z", 0.0, 10.0, 1).await.unwrap();

    // then it is served from the cached prefix
    assert_eq!(one, vec![Value::from("a")]);
    assert_eq!(backend.reads(), 1);

    // and a larger limit misses
    let three = cache.z_range_by_score("z", 0.0, 10.0, 3).await.unwrap();
    assert_eq!(three.len(), 3);
    assert_eq!(backend.reads(), 2);

    // an unbounded query is not served by a bounded entry
    cache.z_range_by_score("z", 0.0, 10.0, 0).await.unwrap();
    assert_eq!(backend.reads(), 3);

    // but once unbounded is cached, it dominates every limit
    cache.z_range_by_score("z", 0.0, 10.0, 2).await.unwrap();
    assert_eq!(backend.reads(), 3);
}

#[tokio::test]
async fn should_keep_eventual_invalidation_away_from_the_strong_view() {
    // given a strong view and an eventually consistent view sharing a store
    let inner: Arc<memorystore::Backend> = Arc::new(memorystore::Backend::new());
    let strong = ReadCache::new(inner.clone());
    let eventual = strong.with_eventually_consistent_reads();

    inner.set("k", "v1".into()).await.unwrap();
    assert_eq!(strong.get("k").await.unwrap(), Some(Value::from("v1")));
    assert_eq!(eventual.get("k").await.unwrap(), Some(Value::from("v1")));

    // when a write goes through the eventual view
    eventual.set("k", "v2".into()).await.unwrap();

    // then the strong view still serves its cached value, while the
    // eventual view sees its own write
    assert_eq!(strong.get("k").await.unwrap(), Some(Value::from("v1")));
    assert_eq!(eventual.get("k").await.unwrap(), Some(Value::from("v2")));

    // and when a write goes through the strong view
    strong.set("k", "v3".into()).await.unwrap();

    // the strong view refetches while the eventual view may stay stale
    assert_eq!(strong.get("k").await.unwrap(), Some(Value::from("v3")));
    assert_eq!(eventual.get("k").await.unwrap(), Some(Value::from("v2")));
}

#[tokio::test]
async fn should_short_circuit_fully_cached_batches() {
    // given a warmed cache
    let (backend, cache) = counted();
    cache.set("foo", "bar".into()).await.unwrap();
    cache.get("foo").await.unwrap();
    assert_eq!(backend.batch_execs(), 0);

    // when a batch holds only cached reads
    let mut batch = cache.batch();
    let get = batch.get("foo");
    batch.exec().await.unwrap();

    // then the underlying batch never ran
    assert_eq!(get.result().unwrap(), Some(Value::from("bar")));
    assert_eq!(backend.batch_execs(), 0);

    // and a miss forces it to run and populates the cache
    let mut batch = cache.batch();
    let miss = batch.get("other");
    batch.exec().await.unwrap();
    assert_eq!(miss.result().unwrap(), None);
    assert_eq!(backend.batch_execs(), 1);

    cache.get("other").await.unwrap();
    assert_eq!(backend.reads(), 1, "the batched miss should have primed the cache");
}

#[tokio::test]
async fn should_invalidate_keys_written_through_a_batch() {
    // given
    let (_, cache) = counted();
    cache.set("foo", "old".into()).await.unwrap();
    cache.get("foo").await.unwrap();

    // when
    let mut batch = cache.batch();
    batch.set("foo", "new".into());
    batch.exec().await.unwrap();

    // then
    assert_eq!(cache.get("foo").await.unwrap(), Some(Value::from("new")));
}

#[tokio::test]
async fn should_invalidate_atomic_write_keys_even_on_abort() {
    // given a cached value that another writer then changes underneath us
    let inner: Arc<memorystore::Backend> = Arc::new(memorystore::Backend::new());
    let cache = ReadCache::new(inner.clone());
    inner.set("k", "v1".into()).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("v1")));
    inner.set("k", "v2".into()).await.unwrap();

    // when an atomic write against the stale value aborts
    let mut tx = cache.atomic_write();
    let cas = tx.cas("k", "v1".into(), "v3".into());
    let committed = tx.exec().await.unwrap();

    // then the failed predicate proved the entry stale, so it was dropped
    assert!(!committed);
    assert!(cas.conditional_failed());
    assert_eq!(cache.get("k").await.unwrap(), Some(Value::from("v2")));
}

#[tokio::test]
async fn should_share_the_memoisation_maps_across_with_backend_views() {
    // given two views over different backends sharing one cache
    let (primary, cache) = counted();
    let secondary = Arc::new(CountingBackend::new(Arc::new(memorystore::Backend::new())));
    let other_view = cache.with_backend(secondary.clone());

    cache.set("foo", "bar".into()).await.unwrap();
    cache.get("foo").await.unwrap();

    // when reading through the other view
    let value = other_view.get("foo").await.unwrap();

    // then the shared cache serves it without consulting either backend
    assert_eq!(value, Some(Value::from("bar")));
    assert_eq!(primary.reads(), 1);
    assert_eq!(secondary.reads(), 0);
}
