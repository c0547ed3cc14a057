//! Table service client seam.
//!
//! The storage client is an external collaborator: this module defines the
//! request model and the [`TableClient`] trait the backend is written
//! against. Conditions and update actions are explicit variants rather than
//! expression strings; service failures keep their wire-level string codes
//! so the backend can consume them exactly as the service documents them.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

/// An attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// Binary.
    B(Bytes),
    /// Number.
    N(i64),
    /// Binary set.
    Bs(Vec<Bytes>),
    /// Boolean.
    Bool(bool),
}

impl AttributeValue {
    /// The value's byte form: binary attributes as-is, numbers in base 10.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            AttributeValue::B(b) => Some(b.clone()),
            AttributeValue::N(n) => Some(Bytes::from(n.to_string())),
            _ => None,
        }
    }
}

/// An item: attribute name to value, including the key attributes.
pub type Item = HashMap<String, AttributeValue>;

/// A conditional clause. Multiple conditions on one request are conjoined.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    AttributeExists(String),
    AttributeNotExists(String),
    Equals(String, AttributeValue),
}

/// An update action.
#[derive(Clone, Debug)]
pub enum Update {
    /// Numeric addition or set union, depending on the attribute type.
    /// Creates the attribute when absent.
    Add(String, AttributeValue),
    /// Removes elements from a byte-set attribute, dropping the attribute
    /// when it empties.
    DeleteElements(String, Vec<Bytes>),
    Set(String, AttributeValue),
    SetIfNotExists(String, AttributeValue),
}

/// Which item image a write returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    AllNew,
}

#[derive(Clone, Debug)]
pub struct GetItemInput {
    pub table_name: String,
    pub key: Item,
    pub consistent_read: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GetItemOutput {
    pub item: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PutItemInput {
    pub table_name: String,
    pub item: Item,
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default)]
pub struct PutItemOutput {
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct DeleteItemInput {
    pub table_name: String,
    pub key: Item,
    pub return_values: ReturnValues,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteItemOutput {
    pub attributes: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct UpdateItemInput {
    pub table_name: String,
    pub key: Item,
    pub updates: Vec<Update>,
    pub conditions: Vec<Condition>,
    pub return_values: ReturnValues,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateItemOutput {
    pub attributes: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

/// A sort-key condition. Bounds are always inclusive; exclusion is the
/// caller's business.
#[derive(Clone, Debug)]
pub enum RangeCondition {
    All,
    AtLeast(Bytes),
    AtMost(Bytes),
    Between(Bytes, Bytes),
}

#[derive(Clone, Debug)]
pub struct QueryInput {
    pub table_name: String,
    /// Query the named local secondary index instead of the primary sort
    /// key.
    pub index_name: Option<String>,
    pub hash_key: Bytes,
    pub range: RangeCondition,
    pub consistent_read: bool,
    pub scan_index_forward: bool,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    /// Return only the match count, no items.
    pub select_count: bool,
}

#[derive(Clone, Debug, Default)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    pub count: usize,
    pub last_evaluated_key: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct BatchGetInput {
    pub table_name: String,
    pub keys: Vec<Item>,
    pub consistent_read: bool,
}

#[derive(Clone, Debug, Default)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    /// Keys the service did not serve this round; the caller re-drives them.
    pub unprocessed_keys: Vec<Item>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Debug)]
pub enum WriteRequest {
    Put(Item),
    Delete(Item),
}

#[derive(Clone, Debug)]
pub struct BatchWriteInput {
    pub table_name: String,
    pub requests: Vec<WriteRequest>,
}

#[derive(Clone, Debug, Default)]
pub struct BatchWriteOutput {
    pub unprocessed: Vec<WriteRequest>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Debug)]
pub enum TransactItem {
    Put { item: Item, conditions: Vec<Condition> },
    Delete { key: Item },
}

#[derive(Clone, Debug)]
pub struct TransactWriteInput {
    pub table_name: String,
    /// Idempotency token attached to the request.
    pub client_request_token: String,
    pub items: Vec<TransactItem>,
}

#[derive(Clone, Debug, Default)]
pub struct TransactWriteOutput {
    pub consumed_capacity: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BillingMode {
    PayPerRequest,
    Provisioned { read_units: i64, write_units: i64 },
}

#[derive(Clone, Debug)]
pub struct CreateTableInput {
    pub table_name: String,
    pub hash_key: String,
    pub range_key: String,
    /// Attribute name of a local secondary index projecting all attributes.
    pub secondary_range_key: Option<String>,
    pub billing: BillingMode,
}

/// A failure reported by the table service, identified by its wire-level
/// string code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }

    pub fn conditional_check_failed() -> Self {
        Self::new("ConditionalCheckFailedException", "The conditional request failed")
    }

    pub fn is_conditional_check_failed(&self) -> bool {
        self.code == "ConditionalCheckFailedException"
    }

    /// The documentation says `TransactionCancelledException`, but the
    /// service returns `TransactionCanceledException`; both are accepted.
    pub fn is_transaction_canceled(&self) -> bool {
        self.code == "TransactionCancelledException" || self.code == "TransactionCanceledException"
    }

    /// A validation failure caused by an item outgrowing the size ceiling.
    pub fn is_size_validation(&self) -> bool {
        self.code == "ValidationException" && self.message.contains("size")
    }

    pub fn is_internal_server_error(&self) -> bool {
        self.code == "InternalServerError"
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

/// A failed transactional write, with one cancellation reason slot per
/// transact item (`None` when that item's condition held).
#[derive(Clone, Debug)]
pub struct TransactWriteError {
    pub error: ServiceError,
    pub cancellation_reasons: Vec<Option<ServiceError>>,
}

impl From<ServiceError> for TransactWriteError {
    fn from(error: ServiceError) -> Self {
        Self { error, cancellation_reasons: Vec::new() }
    }
}

impl std::fmt::Display for TransactWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for TransactWriteError {}

/// The table service client the backend is written against.
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError>;

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError>;

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, ServiceError>;

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, ServiceError>;

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError>;

    async fn batch_get_item(&self, input: BatchGetInput) -> Result<BatchGetOutput, ServiceError>;

    async fn batch_write_item(
        &self,
        input: BatchWriteInput,
    ) -> Result<BatchWriteOutput, ServiceError>;

    async fn transact_write_items(
        &self,
        input: TransactWriteInput,
    ) -> Result<TransactWriteOutput, TransactWriteError>;

    async fn create_table(&self, input: CreateTableInput) -> Result<(), ServiceError>;
}
