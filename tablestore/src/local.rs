//! In-process simulation of the table service.
//!
//! Implements enough of the service contract to drive the backend end to
//! end in tests and local development: conditional puts,
//! typed update actions, the per-item size ceiling, query pagination,
//! batch-slice limits, and transactional writes with per-item cancellation
//! reasons. Faults can be injected into transactional writes to exercise the
//! retry path.

use std::collections::{HashMap, VecDeque};
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::client::{
    AttributeValue, BatchGetInput, BatchGetOutput, BatchWriteInput, BatchWriteOutput, BillingMode,
    Condition, CreateTableInput, DeleteItemInput, DeleteItemOutput, GetItemInput, GetItemOutput,
    Item, PutItemInput, PutItemOutput, QueryInput, QueryOutput, RangeCondition, ReturnValues,
    ServiceError, TableClient, TransactItem, TransactWriteError, TransactWriteInput,
    TransactWriteOutput, UpdateItemInput, UpdateItemOutput, WriteRequest,
};

/// The service's default per-item size ceiling: 400 KiB.
const DEFAULT_ITEM_SIZE_LIMIT: usize = 400 * 1024;

type Table = BTreeMap<(Bytes, Bytes), Item>;

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    transact_faults: VecDeque<ServiceError>,
}

/// An in-process [`TableClient`].
pub struct LocalTableClient {
    state: Mutex<State>,
    item_size_limit: usize,
    query_page_size: Option<usize>,
    batch_get_limit: Option<usize>,
    batch_write_limit: Option<usize>,
    reject_pay_per_request: bool,
}

impl Default for LocalTableClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTableClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            item_size_limit: DEFAULT_ITEM_SIZE_LIMIT,
            query_page_size: None,
            batch_get_limit: None,
            batch_write_limit: None,
            reject_pay_per_request: false,
        }
    }

    /// Overrides the per-item size ceiling.
    pub fn with_item_size_limit(mut self, limit: usize) -> Self {
        self.item_size_limit = limit;
        self
    }

    /// Caps query pages at `size` items, forcing pagination.
    pub fn with_query_page_size(mut self, size: usize) -> Self {
        self.query_page_size = Some(size);
        self
    }

    /// Caps how many keys or write requests one batch call serves, leaving
    /// the rest unprocessed.
    pub fn with_batch_limits(mut self, get: usize, write: usize) -> Self {
        self.batch_get_limit = Some(get);
        self.batch_write_limit = Some(write);
        self
    }

    /// Rejects pay-per-request table creation with a validation error.
    pub fn rejecting_pay_per_request(mut self) -> Self {
        self.reject_pay_per_request = true;
        self
    }

    /// Fails the next transactional write with the given error. Queued
    /// faults fire in order, one per call.
    pub fn fail_next_transact_write(&self, error: ServiceError) {
        self.state.lock().unwrap().transact_faults.push_back(error);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn apply_put(&self, table: &mut Table, item: Item) -> Result<(), ServiceError> {
        let key = item_key(&item)?;
        if item_size(&item) > self.item_size_limit {
            return Err(size_error());
        }
        table.insert(key, item);
        Ok(())
    }
}

fn item_key(item: &Item) -> Result<(Bytes, Bytes), ServiceError> {
    let hk = match item.get("hk") {
        Some(AttributeValue::B(b)) => b.clone(),
        _ => return Err(ServiceError::new("ValidationException", "missing binary hk attribute")),
    };
    let rk = match item.get("rk") {
        Some(AttributeValue::B(b)) => b.clone(),
        _ => return Err(ServiceError::new("ValidationException", "missing binary rk attribute")),
    };
    Ok((hk, rk))
}

fn attribute_size(value: &AttributeValue) -> usize {
    match value {
        AttributeValue::B(b) => b.len(),
        AttributeValue::N(n) => n.to_string().len(),
        AttributeValue::Bs(bs) => bs.iter().map(Bytes::len).sum(),
        AttributeValue::Bool(_) => 1,
    }
}

fn item_size(item: &Item) -> usize {
    item.iter().map(|(name, value)| name.len() + attribute_size(value)).sum()
}

fn size_error() -> ServiceError {
    ServiceError::new(
        "ValidationException",
        "Item size to update has exceeded the maximum allowed size",
    )
}

fn type_error() -> ServiceError {
    ServiceError::new(
        "ValidationException",
        "An operand in the update expression has an incorrect data type",
    )
}

fn check_conditions(item: Option<&Item>, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| match condition {
        Condition::AttributeExists(attr) => item.is_some_and(|i| i.contains_key(attr)),
        Condition::AttributeNotExists(attr) => !item.is_some_and(|i| i.contains_key(attr)),
        Condition::Equals(attr, expected) => {
            item.and_then(|i| i.get(attr)) == Some(expected)
        }
    })
}

fn apply_updates(item: &mut Item, updates: &[crate::client::Update]) -> Result<(), ServiceError> {
    use crate::client::Update;

    for update in updates {
        match update {
            Update::Add(attr, AttributeValue::N(n)) => match item.get_mut(attr) {
                None => {
                    item.insert(attr.clone(), AttributeValue::N(*n));
                }
                Some(AttributeValue::N(current)) => {
                    *current += n;
                }
                Some(_) => return Err(type_error()),
            },
            Update::Add(attr, AttributeValue::Bs(new)) => match item.get_mut(attr) {
                None => {
                    let mut set: Vec<Bytes> = Vec::new();
                    for member in new {
                        if !set.contains(member) {
                            set.push(member.clone());
                        }
                    }
                    item.insert(attr.clone(), AttributeValue::Bs(set));
                }
                Some(AttributeValue::Bs(set)) => {
                    for member in new {
                        if !set.contains(member) {
                            set.push(member.clone());
                        }
                    }
                }
                Some(_) => return Err(type_error()),
            },
            Update::Add(_, _) => return Err(type_error()),
            Update::DeleteElements(attr, members) => match item.get_mut(attr) {
                Some(AttributeValue::Bs(set)) => {
                    set.retain(|m| !members.contains(m));
                    // The service does not keep empty sets around.
                    if set.is_empty() {
                        item.remove(attr);
                    }
                }
                Some(_) => return Err(type_error()),
                None => {}
            },
            Update::Set(attr, value) => {
                item.insert(attr.clone(), value.clone());
            }
            Update::SetIfNotExists(attr, value) => {
                item.entry(attr.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    Ok(())
}

/// Extracts the sort dimension of an item for the primary key or an index.
fn sort_value(item: &Item, key: &(Bytes, Bytes), index: Option<&str>) -> Option<Bytes> {
    match index {
        None => Some(key.1.clone()),
        Some(attr) => match item.get(attr) {
            Some(AttributeValue::B(b)) => Some(b.clone()),
            // Items without the attribute are simply not in the index.
            _ => None,
        },
    }
}

fn in_range(value: &Bytes, range: &RangeCondition) -> bool {
    match range {
        RangeCondition::All => true,
        RangeCondition::AtLeast(lo) => value >= lo,
        RangeCondition::AtMost(hi) => value <= hi,
        RangeCondition::Between(lo, hi) => value >= lo && value <= hi,
    }
}

#[async_trait]
impl TableClient for LocalTableClient {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError> {
        let state = self.lock();
        let key = item_key(&input.key)?;
        let item = state
            .tables
            .get(&input.table_name)
            .and_then(|table| table.get(&key))
            .cloned();
        Ok(GetItemOutput { item, consumed_capacity: Some(1.0) })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError> {
        let mut state = self.lock();
        let table = state.tables.entry(input.table_name.clone()).or_default();
        let key = item_key(&input.item)?;
        if !check_conditions(table.get(&key), &input.conditions) {
            return Err(ServiceError::conditional_check_failed());
        }
        self.apply_put(table, input.item)?;
        Ok(PutItemOutput { consumed_capacity: Some(1.0) })
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, ServiceError> {
        let mut state = self.lock();
        let table = state.tables.entry(input.table_name.clone()).or_default();
        let key = item_key(&input.key)?;
        let old = table.remove(&key);
        let attributes = match input.return_values {
            ReturnValues::AllOld => old,
            _ => None,
        };
        Ok(DeleteItemOutput { attributes, consumed_capacity: Some(1.0) })
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, ServiceError> {
        let mut state = self.lock();
        let table = state.tables.entry(input.table_name.clone()).or_default();
        let key = item_key(&input.key)?;

        let existing = table.get(&key);
        if !check_conditions(existing, &input.conditions) {
            return Err(ServiceError::conditional_check_failed());
        }

        let old = existing.cloned();
        let mut candidate = old.clone().unwrap_or_else(|| input.key.clone());
        apply_updates(&mut candidate, &input.updates)?;
        if item_size(&candidate) > self.item_size_limit {
            return Err(size_error());
        }

        table.insert(key, candidate.clone());
        let attributes = match input.return_values {
            ReturnValues::AllOld => old,
            ReturnValues::AllNew => Some(candidate),
            ReturnValues::None => None,
        };
        Ok(UpdateItemOutput { attributes, consumed_capacity: Some(1.0) })
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError> {
        let state = self.lock();
        let Some(table) = state.tables.get(&input.table_name) else {
            return Ok(QueryOutput::default());
        };

        let index = input.index_name.as_deref();
        let mut rows: Vec<(Bytes, Item)> = table
            .range((input.hash_key.clone(), Bytes::new())..)
            .take_while(|((hk, _), _)| *hk == input.hash_key)
            .filter_map(|(key, item)| {
                sort_value(item, key, index).map(|sort| (sort, item.clone()))
            })
            .filter(|(sort, _)| in_range(sort, &input.range))
            .collect();

        if index.is_some() {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
        }
        if !input.scan_index_forward {
            rows.reverse();
        }

        if let Some(start) = &input.exclusive_start_key {
            if let Some(start_sort) = sort_value(start, &item_key(start)?, index) {
                rows.retain(|(sort, _)| {
                    if input.scan_index_forward {
                        *sort > start_sort
                    } else {
                        *sort < start_sort
                    }
                });
            }
        }

        if input.select_count {
            return Ok(QueryOutput {
                items: Vec::new(),
                count: rows.len(),
                last_evaluated_key: None,
                consumed_capacity: Some(1.0),
            });
        }

        let mut page = rows.len();
        if let Some(limit) = input.limit {
            page = page.min(limit);
        }
        if let Some(page_size) = self.query_page_size {
            page = page.min(page_size);
        }

        let truncated = page < rows.len();
        let items: Vec<Item> = rows.into_iter().take(page).map(|(_, item)| item).collect();
        let last_evaluated_key = if truncated {
            items.last().map(|item| {
                let mut key: Item = Item::new();
                for attr in ["hk", "rk"].into_iter().chain(index) {
                    if let Some(value) = item.get(attr) {
                        key.insert(attr.to_string(), value.clone());
                    }
                }
                key
            })
        } else {
            None
        };

        Ok(QueryOutput {
            count: items.len(),
            items,
            last_evaluated_key,
            consumed_capacity: Some(1.0),
        })
    }

    async fn batch_get_item(&self, input: BatchGetInput) -> Result<BatchGetOutput, ServiceError> {
        let state = self.lock();
        let table = state.tables.get(&input.table_name);

        let served = self.batch_get_limit.unwrap_or(input.keys.len()).min(input.keys.len());
        let mut items = Vec::new();
        for key_item in &input.keys[..served] {
            let key = item_key(key_item)?;
            if let Some(item) = table.and_then(|t| t.get(&key)) {
                items.push(item.clone());
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed_keys: input.keys[served..].to_vec(),
            consumed_capacity: Some(served as f64),
        })
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteInput,
    ) -> Result<BatchWriteOutput, ServiceError> {
        let mut state = self.lock();
        let table = state.tables.entry(input.table_name.clone()).or_default();

        let served = self
            .batch_write_limit
            .unwrap_or(input.requests.len())
            .min(input.requests.len());
        for request in &input.requests[..served] {
            match request {
                WriteRequest::Put(item) => self.apply_put(table, item.clone())?,
                WriteRequest::Delete(key_item) => {
                    let key = item_key(key_item)?;
                    table.remove(&key);
                }
            }
        }
        Ok(BatchWriteOutput {
            unprocessed: input.requests[served..].to_vec(),
            consumed_capacity: Some(served as f64),
        })
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteInput,
    ) -> Result<TransactWriteOutput, TransactWriteError> {
        let mut state = self.lock();
        if let Some(fault) = state.transact_faults.pop_front() {
            return Err(fault.into());
        }
        if input.client_request_token.is_empty() {
            return Err(ServiceError::new(
                "ValidationException",
                "client request token must not be empty",
            )
            .into());
        }

        let table = state.tables.entry(input.table_name.clone()).or_default();

        let mut reasons: Vec<Option<ServiceError>> = Vec::with_capacity(input.items.len());
        let mut cancelled = false;
        for item in &input.items {
            let passed = match item {
                TransactItem::Put { item, conditions } => {
                    let key = item_key(item).map_err(TransactWriteError::from)?;
                    check_conditions(table.get(&key), conditions)
                }
                TransactItem::Delete { .. } => true,
            };
            if passed {
                reasons.push(None);
            } else {
                cancelled = true;
                reasons.push(Some(ServiceError::new(
                    "ConditionalCheckFailed",
                    "The conditional request failed",
                )));
            }
        }

        if cancelled {
            return Err(TransactWriteError {
                error: ServiceError::new(
                    "TransactionCanceledException",
                    "Transaction cancelled, please refer cancellation reasons for specific reasons",
                ),
                cancellation_reasons: reasons,
            });
        }

        let count = input.items.len();
        for item in input.items {
            match item {
                TransactItem::Put { item, .. } => {
                    self.apply_put(table, item).map_err(TransactWriteError::from)?;
                }
                TransactItem::Delete { key } => {
                    let key = item_key(&key).map_err(TransactWriteError::from)?;
                    table.remove(&key);
                }
            }
        }
        Ok(TransactWriteOutput { consumed_capacity: Some(count as f64) })
    }

    async fn create_table(&self, input: CreateTableInput) -> Result<(), ServiceError> {
        if self.reject_pay_per_request && input.billing == BillingMode::PayPerRequest {
            return Err(ServiceError::new(
                "ValidationException",
                "pay-per-request billing mode is not supported",
            ));
        }
        let mut state = self.lock();
        state.tables.entry(input.table_name).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn key(hk: &str, rk: &str) -> Item {
        let mut item = Item::new();
        item.insert("hk".to_string(), AttributeValue::B(b(hk)));
        item.insert("rk".to_string(), AttributeValue::B(b(rk)));
        item
    }

    fn item(hk: &str, rk: &str, value: &str) -> Item {
        let mut item = key(hk, rk);
        item.insert("v".to_string(), AttributeValue::B(b(value)));
        item
    }

    #[tokio::test]
    async fn should_reject_updates_that_exceed_the_size_ceiling() {
        // given
        let client = LocalTableClient::new().with_item_size_limit(64);

        // when
        let result = client
            .update_item(UpdateItemInput {
                table_name: "t".to_string(),
                key: key("set", "0"),
                updates: vec![crate::client::Update::Add(
                    "v".to_string(),
                    AttributeValue::Bs(vec![Bytes::from(vec![b'x'; 100])]),
                )],
                conditions: Vec::new(),
                return_values: ReturnValues::None,
            })
            .await;

        // then
        let err = result.unwrap_err();
        assert!(err.is_size_validation());
    }

    #[tokio::test]
    async fn should_paginate_queries_with_a_page_size() {
        // given
        let client = LocalTableClient::new().with_query_page_size(2);
        for rk in ["a", "b", "c", "d", "e"] {
            client
                .put_item(PutItemInput {
                    table_name: "t".to_string(),
                    item: item("k", rk, rk),
                    conditions: Vec::new(),
                })
                .await
                .unwrap();
        }

        // when
        let mut seen = Vec::new();
        let mut start = None;
        loop {
            let output = client
                .query(QueryInput {
                    table_name: "t".to_string(),
                    index_name: None,
                    hash_key: b("k"),
                    range: RangeCondition::All,
                    consistent_read: true,
                    scan_index_forward: true,
                    limit: None,
                    exclusive_start_key: start.take(),
                    select_count: false,
                })
                .await
                .unwrap();
            assert!(output.items.len() <= 2);
            seen.extend(output.items.iter().map(|i| i.get("v").cloned().unwrap()).map(|v| match v {
                AttributeValue::B(bytes) => bytes,
                _ => panic!("unexpected attribute"),
            }));
            match output.last_evaluated_key {
                Some(last) => start = Some(last),
                None => break,
            }
        }

        // then
        assert_eq!(seen, vec![b("a"), b("b"), b("c"), b("d"), b("e")]);
    }

    #[tokio::test]
    async fn should_leave_extra_batch_keys_unprocessed() {
        // given
        let client = LocalTableClient::new().with_batch_limits(2, 2);
        for rk in ["a", "b", "c"] {
            client
                .put_item(PutItemInput {
                    table_name: "t".to_string(),
                    item: item(rk, "_", rk),
                    conditions: Vec::new(),
                })
                .await
                .unwrap();
        }

        // when
        let output = client
            .batch_get_item(BatchGetInput {
                table_name: "t".to_string(),
                keys: vec![key("a", "_"), key("b", "_"), key("c", "_")],
                consistent_read: true,
            })
            .await
            .unwrap();

        // then
        assert_eq!(output.items.len(), 2);
        assert_eq!(output.unprocessed_keys.len(), 1);
    }

    #[tokio::test]
    async fn should_report_cancellation_reasons_per_transact_item() {
        // given
        let client = LocalTableClient::new();
        client
            .put_item(PutItemInput {
                table_name: "t".to_string(),
                item: item("present", "_", "x"),
                conditions: Vec::new(),
            })
            .await
            .unwrap();

        // when
        let err = client
            .transact_write_items(TransactWriteInput {
                table_name: "t".to_string(),
                client_request_token: "token".to_string(),
                items: vec![
                    TransactItem::Put {
                        item: item("present", "_", "y"),
                        conditions: vec![Condition::AttributeNotExists("v".to_string())],
                    },
                    TransactItem::Delete { key: key("other", "_") },
                ],
            })
            .await
            .unwrap_err();

        // then
        assert!(err.error.is_transaction_canceled());
        assert_eq!(err.cancellation_reasons.len(), 2);
        assert_eq!(err.cancellation_reasons[0].as_ref().unwrap().code, "ConditionalCheckFailed");
        assert!(err.cancellation_reasons[1].is_none());
    }

    #[tokio::test]
    async fn should_fire_injected_transact_faults_in_order() {
        // given
        let client = LocalTableClient::new();
        client.fail_next_transact_write(ServiceError::new("InternalServerError", "oops"));

        // when
        let err = client
            .transact_write_items(TransactWriteInput {
                table_name: "t".to_string(),
                client_request_token: "token".to_string(),
                items: vec![TransactItem::Delete { key: key("k", "_") }],
            })
            .await
            .unwrap_err();

        // then
        assert!(err.error.is_internal_server_error());

        // and the next call succeeds
        client
            .transact_write_items(TransactWriteInput {
                table_name: "t".to_string(),
                client_request_token: "token".to_string(),
                items: vec![TransactItem::Delete { key: key("k", "_") }],
            })
            .await
            .unwrap();
    }
}
