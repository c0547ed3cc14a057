use std::sync::Arc;

use keyvalue::Backend;
use tablestore::LocalTableClient;

fn factory() -> Arc<dyn Backend> {
    let client = Arc::new(LocalTableClient::new());
    Arc::new(tablestore::Backend::new(client, "conformance"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conforms_to_the_backend_contract() {
    storetest::test_backend(&factory).await;
}

#[tokio::test]
async fn batches_read_before_they_write() {
    storetest::test_batch_read_isolation(&factory).await;
}

/// Forcing pagination through tiny query pages must not change what range
/// scans and set reads observe.
fn paginating_factory() -> Arc<dyn Backend> {
    let client = Arc::new(LocalTableClient::new().with_query_page_size(2).with_batch_limits(3, 2));
    Arc::new(tablestore::Backend::new(client, "conformance"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conforms_under_aggressive_pagination() {
    storetest::test_backend(&paginating_factory).await;
}
