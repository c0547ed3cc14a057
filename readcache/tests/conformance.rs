use std::sync::Arc;

use keyvalue::Backend;
use readcache::ReadCache;

fn over_memory() -> Arc<dyn Backend> {
    Arc::new(ReadCache::new(Arc::new(memorystore::Backend::new())))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conforms_over_the_memory_backend() {
    storetest::test_backend(&over_memory).await;
}

fn over_table() -> Arc<dyn Backend> {
    let client = Arc::new(tablestore::LocalTableClient::new());
    Arc::new(ReadCache::new(Arc::new(tablestore::Backend::new(client, "conformance"))))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conforms_over_the_table_backend() {
    storetest::test_backend(&over_table).await;
}
