//! Per-request profiling for the table client.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::client::{
    BatchGetInput, BatchGetOutput, BatchWriteInput, BatchWriteOutput, CreateTableInput,
    DeleteItemInput, DeleteItemOutput, GetItemInput, GetItemOutput, PutItemInput, PutItemOutput,
    QueryInput, QueryOutput, ServiceError, TableClient, TransactWriteError, TransactWriteInput,
    TransactWriteOutput, UpdateItemInput, UpdateItemOutput,
};

/// Observer of table client requests.
pub trait Profiler: Send + Sync {
    /// Records one client request and the time spent across the underlying
    /// call.
    fn add_request_profile(&self, operation: &'static str, duration: Duration);

    /// Accumulates read capacity units consumed by a request.
    fn consume_read_capacity(&self, units: f64);

    /// Accumulates write capacity units consumed by a request.
    fn consume_write_capacity(&self, units: f64);
}

/// A profiler backed by atomic counters.
///
/// Capacity units are stored scaled by 4 so quarter-unit consumption fits
/// integer arithmetic.
#[derive(Default)]
pub struct BasicProfiler {
    request_count: AtomicI64,
    request_nanos: AtomicI64,
    read_capacity_x4: AtomicI64,
    write_capacity_x4: AtomicI64,
}

impl BasicProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> i64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn request_duration(&self) -> Duration {
        Duration::from_nanos(self.request_nanos.load(Ordering::SeqCst).max(0) as u64)
    }

    pub fn read_capacity_consumed(&self) -> f64 {
        self.read_capacity_x4.load(Ordering::SeqCst) as f64 / 4.0
    }

    pub fn write_capacity_consumed(&self) -> f64 {
        self.write_capacity_x4.load(Ordering::SeqCst) as f64 / 4.0
    }
}

impl Profiler for BasicProfiler {
    fn add_request_profile(&self, _operation: &'static str, duration: Duration) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.request_nanos.fetch_add(duration.as_nanos() as i64, Ordering::SeqCst);
    }

    fn consume_read_capacity(&self, units: f64) {
        self.read_capacity_x4.fetch_add((units * 4.0) as i64, Ordering::SeqCst);
    }

    fn consume_write_capacity(&self, units: f64) {
        self.write_capacity_x4.fetch_add((units * 4.0) as i64, Ordering::SeqCst);
    }
}

/// A [`TableClient`] that reports every request to a [`Profiler`].
/// Measurements are taken across the underlying client call only.
pub struct ProfilingTableClient {
    client: Arc<dyn TableClient>,
    profiler: Arc<dyn Profiler>,
}

impl ProfilingTableClient {
    pub fn new(client: Arc<dyn TableClient>, profiler: Arc<dyn Profiler>) -> Self {
        Self { client, profiler }
    }

    fn profile_read(&self, capacity: Option<f64>) {
        if let Some(units) = capacity {
            self.profiler.consume_read_capacity(units);
        }
    }

    fn profile_write(&self, capacity: Option<f64>) {
        if let Some(units) = capacity {
            self.profiler.consume_write_capacity(units);
        }
    }
}

#[async_trait]
impl TableClient for ProfilingTableClient {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.get_item(input).await;
        self.profiler.add_request_profile("GetItem", start.elapsed());
        if let Ok(output) = &output {
            self.profile_read(output.consumed_capacity);
        }
        output
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.put_item(input).await;
        self.profiler.add_request_profile("PutItem", start.elapsed());
        if let Ok(output) = &output {
            self.profile_write(output.consumed_capacity);
        }
        output
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.delete_item(input).await;
        self.profiler.add_request_profile("DeleteItem", start.elapsed());
        if let Ok(output) = &output {
            self.profile_write(output.consumed_capacity);
        }
        output
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.update_item(input).await;
        self.profiler.add_request_profile("UpdateItem", start.elapsed());
        if let Ok(output) = &output {
            self.profile_write(output.consumed_capacity);
        }
        output
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.query(input).await;
        self.profiler.add_request_profile("Query", start.elapsed());
        if let Ok(output) = &output {
            self.profile_read(output.consumed_capacity);
        }
        output
    }

    async fn batch_get_item(&self, input: BatchGetInput) -> Result<BatchGetOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.batch_get_item(input).await;
        self.profiler.add_request_profile("BatchGetItem", start.elapsed());
        if let Ok(output) = &output {
            self.profile_read(output.consumed_capacity);
        }
        output
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteInput,
    ) -> Result<BatchWriteOutput, ServiceError> {
        let start = Instant::now();
        let output = self.client.batch_write_item(input).await;
        self.profiler.add_request_profile("BatchWriteItem", start.elapsed());
        if let Ok(output) = &output {
            self.profile_write(output.consumed_capacity);
        }
        output
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteInput,
    ) -> Result<TransactWriteOutput, TransactWriteError> {
        let start = Instant::now();
        let output = self.client.transact_write_items(input).await;
        self.profiler.add_request_profile("TransactWriteItems", start.elapsed());
        if let Ok(output) = &output {
            self.profile_write(output.consumed_capacity);
        }
        output
    }

    async fn create_table(&self, input: CreateTableInput) -> Result<(), ServiceError> {
        let start = Instant::now();
        let output = self.client.create_table(input).await;
        self.profiler.add_request_profile("CreateTable", start.elapsed());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_accumulate_capacity_in_quarter_units() {
        // given
        let profiler = BasicProfiler::new();

        // when
        profiler.consume_read_capacity(0.5);
        profiler.consume_read_capacity(1.25);
        profiler.consume_write_capacity(2.0);

        // then
        assert_eq!(profiler.read_capacity_consumed(), 1.75);
        assert_eq!(profiler.write_capacity_consumed(), 2.0);
    }

    #[test]
    fn should_count_requests_and_durations() {
        // given
        let profiler = BasicProfiler::new();

        // when
        profiler.add_request_profile("GetItem", Duration::from_millis(3));
        profiler.add_request_profile("Query", Duration::from_millis(4));

        // then
        assert_eq!(profiler.request_count(), 2);
        assert_eq!(profiler.request_duration(), Duration::from_millis(7));
    }
}
