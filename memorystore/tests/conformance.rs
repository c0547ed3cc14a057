use std::sync::Arc;

use keyvalue::Backend;

fn factory() -> Arc<dyn Backend> {
    Arc::new(memorystore::Backend::new())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conforms_to_the_backend_contract() {
    storetest::test_backend(&factory).await;
}

#[tokio::test]
async fn batches_read_before_they_write() {
    storetest::test_batch_read_isolation(&factory).await;
}
