//! Bulk batch dispatch over the service's multi-get and multi-write
//! primitives.
//!
//! Gets and set-member reads coalesce into 100-key multi-gets, fanned out
//! concurrently and re-driven until the service reports nothing
//! unprocessed. Scalar sets and sorted-set adds coalesce into 25-item write
//! batches. Everything else falls back to serial per-operation dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;

use keyvalue::util::concat_keys;
use keyvalue::{
    score, BatchOperation, BatchResult, Error, FallbackBatchOperation, Result, Value,
};

use crate::backend::{attribute_to_value, attribute_value, composite_key, new_item, set_key,
    Backend, SCALAR_SORT_KEY};
use crate::client::{AttributeValue, BatchGetInput, BatchWriteInput, Item, WriteRequest};

const MAX_BATCH_GET_KEYS: usize = 100;
const MAX_BATCH_WRITE_ITEMS: usize = 25;

struct PendingWrite {
    item: Item,
    result: BatchResult<()>,
}

pub(crate) struct TableBatchOperation<'a> {
    backend: &'a Backend,
    fallback: FallbackBatchOperation<'a>,
    gets: HashMap<String, BatchResult<Option<Value>>>,
    smembers: HashMap<String, BatchResult<Vec<Value>>>,
    /// Keyed by the length-prefixed `(hash, range)` pair; duplicate writes to
    /// one slot keep only the last request.
    writes: HashMap<Bytes, PendingWrite>,
}

impl<'a> TableBatchOperation<'a> {
    pub(crate) fn new(backend: &'a Backend) -> Self {
        Self {
            backend,
            fallback: FallbackBatchOperation::new(backend),
            gets: HashMap::new(),
            smembers: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    fn batch_write(&mut self, hash: &str, range: &[u8], item: Item) -> BatchResult<()> {
        let slot = concat_keys([hash.as_bytes(), range]);
        if let Some(write) = self.writes.get_mut(&slot) {
            write.item = item;
            return write.result.clone();
        }
        let result = BatchResult::new();
        self.writes.insert(slot, PendingWrite { item, result: result.clone() });
        result
    }

    async fn exec_reads(&self) -> Result<()> {
        let mut keys: Vec<Item> = Vec::with_capacity(self.gets.len() + self.smembers.len());
        for key in self.gets.keys() {
            keys.push(composite_key(key, SCALAR_SORT_KEY));
        }
        for key in self.smembers.keys() {
            keys.push(set_key(key, 0));
        }
        if keys.is_empty() {
            return Ok(());
        }

        let chunks: Vec<_> = keys.chunks(MAX_BATCH_GET_KEYS).map(<[Item]>::to_vec).collect();
        let results = join_all(chunks.into_iter().map(|chunk| self.read_chunk(chunk))).await;
        for result in results {
            result?;
        }

        // Keys the service never returned are absent. Handles already filled
        // above keep their first value.
        for result in self.gets.values() {
            result.fill(Ok(None));
        }
        for result in self.smembers.values() {
            result.fill(Ok(Vec::new()));
        }
        Ok(())
    }

    async fn read_chunk(&self, chunk: Vec<Item>) -> Result<()> {
        let mut deferred_error = None;
        let mut unprocessed = chunk.clone();

        while !unprocessed.is_empty() {
            let input = BatchGetInput {
                table_name: self.backend.table_name.clone(),
                keys: std::mem::take(&mut unprocessed),
                consistent_read: !self.backend.allow_eventually_consistent_reads,
            };
            let output = match self.backend.client.batch_get_item(input).await {
                Ok(output) => output,
                Err(err) => {
                    let err = Error::transport("table service batch get item", err);
                    for key in &chunk {
                        if let Some(hash) = item_hash_key(key) {
                            if let Some(get) = self.gets.get(&hash) {
                                get.fill(Err(err.clone()));
                            }
                            if let Some(smembers) = self.smembers.get(&hash) {
                                smembers.fill(Err(err.clone()));
                            }
                        }
                    }
                    return Err(err);
                }
            };

            for item in output.items {
                let Some(hash) = item_hash_key(&item) else { continue };
                if let Some(get) = self.gets.get(&hash) {
                    get.fill(Ok(item.get("v").and_then(attribute_to_value)));
                }
                if let Some(smembers) = self.smembers.get(&hash) {
                    let closed = matches!(item.get("c"), Some(AttributeValue::Bool(true)));
                    if closed {
                        // The set spilled into further shards; gather them
                        // with a full paginated read.
                        let members = keyvalue::Backend::s_members(self.backend, &hash).await;
                        if let Err(err) = &members {
                            deferred_error = Some(err.clone());
                        }
                        smembers.fill(members);
                    } else {
                        let members = match item.get("v") {
                            Some(AttributeValue::Bs(bs)) => {
                                bs.iter().map(|b| b.clone().into()).collect()
                            }
                            _ => Vec::new(),
                        };
                        smembers.fill(Ok(members));
                    }
                }
            }

            unprocessed = output.unprocessed_keys;
        }

        match deferred_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn exec_writes(&self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let pending: Vec<&PendingWrite> = self.writes.values().collect();

        for chunk in pending.chunks(MAX_BATCH_WRITE_ITEMS) {
            let mut unprocessed: Vec<WriteRequest> =
                chunk.iter().map(|w| WriteRequest::Put(w.item.clone())).collect();

            while !unprocessed.is_empty() {
                let input = BatchWriteInput {
                    table_name: self.backend.table_name.clone(),
                    requests: std::mem::take(&mut unprocessed),
                };
                match self.backend.client.batch_write_item(input).await {
                    Ok(output) => unprocessed = output.unprocessed,
                    Err(err) => {
                        let err = Error::transport("table service batch write item", err);
                        for write in &pending {
                            write.result.fill(Err(err.clone()));
                        }
                        return Err(err);
                    }
                }
            }

            for write in chunk {
                write.result.fill(Ok(()));
            }
        }
        Ok(())
    }
}

fn item_hash_key(item: &Item) -> Option<String> {
    match item.get("hk") {
        Some(AttributeValue::B(b)) => String::from_utf8(b.to_vec()).ok(),
        _ => None,
    }
}

#[async_trait]
impl BatchOperation for TableBatchOperation<'_> {
    fn get(&mut self, key: &str) -> BatchResult<Option<Value>> {
        self.gets.entry(key.to_string()).or_insert_with(BatchResult::new).clone()
    }

    fn delete(&mut self, key: &str) -> BatchResult<bool> {
        self.fallback.delete(key)
    }

    fn set(&mut self, key: &str, value: Value) -> BatchResult<()> {
        let item = new_item(key, SCALAR_SORT_KEY, vec![("v", attribute_value(&value))]);
        self.batch_write(key, SCALAR_SORT_KEY, item)
    }

    fn s_members(&mut self, key: &str) -> BatchResult<Vec<Value>> {
        self.smembers.entry(key.to_string()).or_insert_with(BatchResult::new).clone()
    }

    fn s_add(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        self.fallback.s_add(key, members)
    }

    fn s_rem(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        self.fallback.s_rem(key, members)
    }

    fn z_add(&mut self, key: &str, member: Value, score_value: f64) -> BatchResult<()> {
        let member = member.as_bytes();
        let item = new_item(
            key,
            &member,
            vec![
                ("v", AttributeValue::B(member.clone())),
                ("rk2", AttributeValue::B(score::member_key(score_value, &member))),
            ],
        );
        self.batch_write(key, &member, item)
    }

    fn z_rem(&mut self, key: &str, member: Value) -> BatchResult<()> {
        self.fallback.z_rem(key, member)
    }

    async fn exec(self: Box<Self>) -> Result<()> {
        self.exec_reads().await?;
        self.exec_writes().await?;
        let this = *self;
        Box::new(this.fallback).exec().await
    }
}
