use std::sync::Arc;

use bytes::Bytes;
use keyvalue::{Backend as _, Error, Value};
use tablestore::client::{
    AttributeValue, QueryInput, RangeCondition, ServiceError, TableClient,
};
use tablestore::{create_default_table, Backend, BasicProfiler, LocalTableClient};

const TABLE: &str = "kv";

fn backend_with(client: Arc<LocalTableClient>) -> Backend {
    Backend::new(client, TABLE)
}

#[tokio::test]
async fn should_spill_large_sets_across_shards() {
    // given a tiny item ceiling so a handful of members overflows a shard
    let client = Arc::new(LocalTableClient::new().with_item_size_limit(256));
    let backend = backend_with(client.clone());

    // when
    let members: Vec<Value> = (0..10)
        .map(|i| Value::from(format!("{}{}", "m".repeat(60), i)))
        .collect();
    for member in &members {
        backend.s_add("big", vec![member.clone()]).await.unwrap();
    }

    // then the logical set is intact
    let mut read = backend.s_members("big").await.unwrap();
    read.sort_by_key(Value::as_bytes);
    let mut expected = members.clone();
    expected.sort_by_key(Value::as_bytes);
    assert_eq!(read, expected);

    // and it physically spans several shard items, with earlier shards
    // marked closed
    let output = client
        .query(QueryInput {
            table_name: TABLE.to_string(),
            index_name: None,
            hash_key: Bytes::from_static(b"big"),
            range: RangeCondition::All,
            consistent_read: true,
            scan_index_forward: true,
            limit: None,
            exclusive_start_key: None,
            select_count: false,
        })
        .await
        .unwrap();
    assert!(output.items.len() > 1, "expected the set to shard");
    let closed = output
        .items
        .iter()
        .filter(|item| matches!(item.get("c"), Some(AttributeValue::Bool(true))))
        .count();
    assert_eq!(closed, output.items.len() - 1, "all but the live shard are closed");
}

#[tokio::test]
async fn should_remove_members_from_closed_shards() {
    // given a sharded set
    let client = Arc::new(LocalTableClient::new().with_item_size_limit(256));
    let backend = backend_with(client);
    let members: Vec<Value> = (0..10)
        .map(|i| Value::from(format!("{}{}", "m".repeat(60), i)))
        .collect();
    for member in &members {
        backend.s_add("big", vec![member.clone()]).await.unwrap();
    }

    // when removing a member that lives in the first (closed) shard
    backend.s_rem("big", vec![members[0].clone()]).await.unwrap();

    // then
    let read = backend.s_members("big").await.unwrap();
    assert_eq!(read.len(), members.len() - 1);
    assert!(!read.contains(&members[0]));
}

#[tokio::test(start_paused = true)]
async fn should_retry_transactional_writes_on_internal_errors() {
    // given two transient internal errors queued up
    let client = Arc::new(LocalTableClient::new());
    client.fail_next_transact_write(ServiceError::new("InternalServerError", "wobble"));
    client.fail_next_transact_write(ServiceError::new("InternalServerError", "wobble"));
    let backend = backend_with(client);

    // when
    let mut tx = backend.atomic_write();
    let nx = tx.set_nx("foo", "bar".into());
    let committed = tx.exec().await.unwrap();

    // then the write eventually lands
    assert!(committed);
    assert!(!nx.conditional_failed());
    assert_eq!(backend.get("foo").await.unwrap(), Some(Value::from("bar")));
}

#[tokio::test(start_paused = true)]
async fn should_surface_internal_errors_past_the_retry_budget() {
    // given more consecutive failures than the budget allows
    let client = Arc::new(LocalTableClient::new());
    for _ in 0..4 {
        client.fail_next_transact_write(ServiceError::new("InternalServerError", "wobble"));
    }
    let backend = backend_with(client);

    // when
    let mut tx = backend.atomic_write();
    tx.set_nx("foo", "bar".into());
    let result = tx.exec().await;

    // then
    assert!(matches!(result, Err(Error::Transport { .. })));
}

#[tokio::test]
async fn should_surface_contention_after_exhausting_increment_retries() {
    // A conditional-check failure on every attempt looks like a permanently
    // contended score; after the budget the backend gives up.
    struct AlwaysContended {
        inner: LocalTableClient,
    }

    #[async_trait::async_trait]
    impl TableClient for AlwaysContended {
        async fn get_item(
            &self,
            input: tablestore::client::GetItemInput,
        ) -> Result<tablestore::client::GetItemOutput, ServiceError> {
            self.inner.get_item(input).await
        }

        async fn put_item(
            &self,
            _input: tablestore::client::PutItemInput,
        ) -> Result<tablestore::client::PutItemOutput, ServiceError> {
            Err(ServiceError::conditional_check_failed())
        }

        async fn delete_item(
            &self,
            input: tablestore::client::DeleteItemInput,
        ) -> Result<tablestore::client::DeleteItemOutput, ServiceError> {
            self.inner.delete_item(input).await
        }

        async fn update_item(
            &self,
            input: tablestore::client::UpdateItemInput,
        ) -> Result<tablestore::client::UpdateItemOutput, ServiceError> {
            self.inner.update_item(input).await
        }

        async fn query(
            &self,
            input: QueryInput,
        ) -> Result<tablestore::client::QueryOutput, ServiceError> {
            self.inner.query(input).await
        }

        async fn batch_get_item(
            &self,
            input: tablestore::client::BatchGetInput,
        ) -> Result<tablestore::client::BatchGetOutput, ServiceError> {
            self.inner.batch_get_item(input).await
        }

        async fn batch_write_item(
            &self,
            input: tablestore::client::BatchWriteInput,
        ) -> Result<tablestore::client::BatchWriteOutput, ServiceError> {
            self.inner.batch_write_item(input).await
        }

        async fn transact_write_items(
            &self,
            input: tablestore::client::TransactWriteInput,
        ) -> Result<tablestore::client::TransactWriteOutput, tablestore::client::TransactWriteError>
        {
            self.inner.transact_write_items(input).await
        }

        async fn create_table(
            &self,
            input: tablestore::client::CreateTableInput,
        ) -> Result<(), ServiceError> {
            self.inner.create_table(input).await
        }
    }

    // given a member whose conditional writes always lose
    let client = Arc::new(AlwaysContended { inner: LocalTableClient::new() });
    let backend = Backend::new(client, TABLE);
    backend.z_add("scores", "m".into(), 1.0).await.ok();

    // when
    let result = backend.z_incr_by("scores", "m".into(), 1.0).await;

    // then
    assert!(matches!(result, Err(Error::Contention { attempts: 3 })));
}

#[tokio::test]
async fn should_profile_requests_and_capacity() {
    // given
    let client = Arc::new(LocalTableClient::new());
    let profiler = Arc::new(BasicProfiler::new());
    let backend = backend_with(client).with_profiler(profiler.clone());

    // when
    backend.set("foo", "bar".into()).await.unwrap();
    backend.get("foo").await.unwrap();
    backend.get("foo").await.unwrap();

    // then
    assert_eq!(profiler.request_count(), 3);
    assert!(profiler.read_capacity_consumed() >= 2.0);
    assert!(profiler.write_capacity_consumed() >= 1.0);
}

#[tokio::test]
async fn should_fall_back_to_provisioned_billing() {
    // given a service that rejects pay-per-request billing
    let client = LocalTableClient::new().rejecting_pay_per_request();

    // when
    let result = create_default_table(&client, "kv").await;

    // then the provisioned retry succeeds
    assert!(result.is_ok());
}

#[tokio::test]
async fn should_read_scalars_written_as_integers() {
    // given
    let client = Arc::new(LocalTableClient::new());
    let backend = backend_with(client);

    // when an integer value is stored natively
    backend.set("n", Value::from(7)).await.unwrap();

    // then it reads back as its decimal form and remains addable
    assert_eq!(backend.get("n").await.unwrap(), Some(Value::from("7")));
    assert_eq!(backend.add_int("n", 3).await.unwrap(), 10);
}
