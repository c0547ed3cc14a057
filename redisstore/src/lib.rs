//! Remote data-structure server backend.
//!
//! Maps each store operation onto the server's native command set: scalars
//! onto the string commands, unordered sets onto the set commands, sorted
//! sets onto the sorted-set commands with the store's range-bound grammar
//! passed through unchanged. Batches dispatch over a pipeline; atomic write
//! groups compile into a single server-side script so the predicate checks
//! and writes execute as one unit.
//!
//! The server is reached through the [`client::CommandClient`] seam.

mod atomic;
mod backend;
mod batch;
mod profiler;

pub mod client;

pub use backend::Backend;
pub use profiler::{BasicProfiler, Profiler, ProfilingCommandClient};

#[cfg(test)]
mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::client::{ClientError, Command, CommandClient, Reply};

    /// Records dispatched commands and plays back scripted replies.
    #[derive(Default)]
    pub struct MockClient {
        pub commands: Mutex<Vec<Command>>,
        pub evals: Mutex<Vec<(String, Vec<Bytes>, Vec<Bytes>)>>,
        pub pipelines: Mutex<Vec<Vec<Command>>>,
        replies: Mutex<VecDeque<Reply>>,
        eval_replies: Mutex<VecDeque<Reply>>,
    }

    impl MockClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_reply(&self, reply: Reply) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn push_eval_reply(&self, reply: Reply) {
            self.eval_replies.lock().unwrap().push_back(reply);
        }

        pub fn take_commands(&self) -> Vec<Command> {
            std::mem::take(&mut self.commands.lock().unwrap())
        }
    }

    #[async_trait]
    impl CommandClient for MockClient {
        async fn cmd(&self, command: Command) -> Result<Reply, ClientError> {
            self.commands.lock().unwrap().push(command);
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Simple("OK".to_string())))
        }

        async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, ClientError> {
            let mut replies = Vec::with_capacity(commands.len());
            {
                let mut scripted = self.replies.lock().unwrap();
                for _ in &commands {
                    replies.push(scripted.pop_front().unwrap_or(Reply::Simple("OK".to_string())));
                }
            }
            self.pipelines.lock().unwrap().push(commands);
            Ok(replies)
        }

        async fn eval(
            &self,
            script: &str,
            keys: Vec<Bytes>,
            args: Vec<Bytes>,
        ) -> Result<Reply, ClientError> {
            self.evals.lock().unwrap().push((script.to_string(), keys, args));
            Ok(self.eval_replies.lock().unwrap().pop_front().unwrap_or(Reply::Nil))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use keyvalue::{Backend as _, Error, Value};

    use crate::client::{Command, Reply};
    use crate::mock::MockClient;
    use crate::Backend;

    fn backend() -> (Arc<MockClient>, Backend) {
        let client = Arc::new(MockClient::new());
        (client.clone(), Backend::new(client))
    }

    fn cmd(name: &'static str, args: &[&str]) -> Command {
        let mut command = Command::new(name);
        for arg in args {
            command = command.arg(arg);
        }
        command
    }

    #[tokio::test]
    async fn should_map_scalar_operations_onto_native_commands() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Data(Bytes::from_static(b"bar")));
        client.push_reply(Reply::Simple("OK".to_string()));
        client.push_reply(Reply::Nil);
        client.push_reply(Reply::Int(1));
        client.push_reply(Reply::Int(3));

        // when
        let got = backend.get("foo").await.unwrap();
        backend.set("foo", "bar".into()).await.unwrap();
        let set_nx = backend.set_nx("foo", "baz".into()).await.unwrap();
        let deleted = backend.delete("foo").await.unwrap();
        let added = backend.add_int("n", 3).await.unwrap();

        // then
        assert_eq!(got, Some(Value::from("bar")));
        assert!(!set_nx);
        assert!(deleted);
        assert_eq!(added, 3);
        assert_eq!(
            client.take_commands(),
            vec![
                cmd("GET", &["foo"]),
                cmd("SET", &["foo", "bar"]),
                cmd("SET", &["foo", "baz", "NX"]),
                cmd("DEL", &["foo"]),
                cmd("INCRBY", &["n", "3"]),
            ]
        );
    }

    #[tokio::test]
    async fn should_serialize_infinite_bounds_in_the_native_float_grammar() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Array(vec![]));
        client.push_reply(Reply::Int(0));

        // when
        backend
            .z_range_by_score("z", f64::NEG_INFINITY, 1.5, 0)
            .await
            .unwrap();
        backend.z_count("z", 0.5, f64::INFINITY).await.unwrap();

        // then
        assert_eq!(
            client.take_commands(),
            vec![
                cmd("ZRANGEBYSCORE", &["z", "-inf", "1.5"]),
                cmd("ZCOUNT", &["z", "0.5", "+inf"]),
            ]
        );
    }

    #[tokio::test]
    async fn should_order_reverse_range_bounds_max_first() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Array(vec![]));
        client.push_reply(Reply::Array(vec![]));

        // when
        backend.z_rev_range_by_score("z", 0.5, 2.5, 10).await.unwrap();
        backend.z_rev_range_by_lex("z", "[a", "(d", 0).await.unwrap();

        // then
        assert_eq!(
            client.take_commands(),
            vec![
                cmd("ZREVRANGEBYSCORE", &["z", "2.5", "0.5", "LIMIT", "0", "10"]),
                cmd("ZREVRANGEBYLEX", &["z", "(d", "[a"]),
            ]
        );
    }

    #[tokio::test]
    async fn should_decode_scored_range_replies_in_pairs() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Array(vec![
            Reply::Data(Bytes::from_static(b"a")),
            Reply::Data(Bytes::from_static(b"0.5")),
            Reply::Data(Bytes::from_static(b"b")),
            Reply::Data(Bytes::from_static(b"2")),
        ]));

        // when
        let members = backend
            .z_range_by_score_with_scores("z", 0.0, 10.0, 0)
            .await
            .unwrap();

        // then
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].value, Value::from("a"));
        assert_eq!(members[0].score, 0.5);
        assert_eq!(members[1].value, Value::from("b"));
        assert_eq!(members[1].score, 2.0);
    }

    #[tokio::test]
    async fn should_swap_via_an_equality_guarded_script() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Data(Bytes::from_static(b"bar")));
        client.push_eval_reply(Reply::Int(1));

        // when
        let swapped = backend
            .cas("foo", Box::new(|prev| {
                assert_eq!(prev, Some(&Value::from("bar")));
                Ok(Some("baz".into()))
            }))
            .await
            .unwrap();

        // then
        assert!(swapped);
        let evals = client.evals.lock().unwrap();
        let (script, keys, args) = &evals[0];
        assert!(script.contains("redis.call('get', KEYS[1]) == ARGV[1]"));
        assert_eq!(keys, &vec![Bytes::from_static(b"foo")]);
        assert_eq!(args, &vec![Bytes::from_static(b"bar"), Bytes::from_static(b"baz")]);
    }

    #[tokio::test]
    async fn should_not_write_when_the_transform_requests_no_change() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Data(Bytes::from_static(b"bar")));

        // when
        let ok = backend.cas("foo", Box::new(|_| Ok(None))).await.unwrap();

        // then
        assert!(ok);
        assert!(client.evals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_propagate_transform_errors_without_writing() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Nil);

        // when
        let result = backend
            .cas("foo", Box::new(|_| Err(Error::InvalidArgument("nope".into()))))
            .await;

        // then
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(client.evals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_compile_atomic_writes_into_one_script() {
        // given
        let (client, backend) = backend();
        client.push_eval_reply(Reply::Array(vec![Reply::Int(1), Reply::Int(1), Reply::Int(1)]));

        // when
        let mut tx = backend.atomic_write();
        tx.set_nx("a", "1".into());
        tx.cas("b", "old".into(), "new".into());
        tx.delete("c");
        let committed = tx.exec().await.unwrap();

        // then
        assert!(committed);
        let evals = client.evals.lock().unwrap();
        let (script, keys, args) = &evals[0];
        assert_eq!(
            script.as_str(),
            "local checks = {}\n\
             checks[1] = redis.call('exists', KEYS[1]) == 0\n\
             checks[2] = redis.call('get', KEYS[2]) == ARGV[2]\n\
             checks[3] = true\n\
             for i, v in ipairs(checks) do\n\
             if not v then\n\
             return checks\n\
             end\n\
             end\n\
             redis.call('set', KEYS[1], ARGV[1])\n\
             redis.call('set', KEYS[2], ARGV[3])\n\
             redis.call('del', KEYS[3])\n\
             return checks"
        );
        assert_eq!(
            keys,
            &vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
        assert_eq!(
            args,
            &vec![
                Bytes::from_static(b"1"),
                Bytes::from_static(b"old"),
                Bytes::from_static(b"new")
            ]
        );
    }

    #[tokio::test]
    async fn should_mark_handles_from_the_check_vector() {
        // given
        let (client, backend) = backend();
        // Slot one is nil: the first predicate failed, the second held.
        client.push_eval_reply(Reply::Array(vec![Reply::Nil, Reply::Int(1)]));

        // when
        let mut tx = backend.atomic_write();
        let first = tx.set_nx("taken", "x".into());
        let second = tx.delete("gone");
        let committed = tx.exec().await.unwrap();

        // then
        assert!(!committed);
        assert!(first.conditional_failed());
        assert!(!second.conditional_failed());
    }

    #[tokio::test]
    async fn should_enforce_the_atomic_write_operation_cap() {
        // given
        let (_, backend) = backend();

        // when
        let mut tx = backend.atomic_write();
        for i in 0..11 {
            tx.delete(&format!("key-{}", i));
        }
        let result = tx.exec().await;

        // then
        assert!(matches!(result, Err(Error::TooManyOperations { count: 11, max: 10 })));
    }

    #[tokio::test]
    async fn should_dispatch_batches_over_one_pipeline() {
        // given
        let (client, backend) = backend();
        client.push_reply(Reply::Data(Bytes::from_static(b"bar")));
        client.push_reply(Reply::Simple("OK".to_string()));
        client.push_reply(Reply::Int(0));
        client.push_reply(Reply::Array(vec![Reply::Data(Bytes::from_static(b"m"))]));

        // when
        let mut batch = backend.batch();
        let get = batch.get("foo");
        let set = batch.set("k", "v".into());
        let del = batch.delete("absent");
        let members = batch.s_members("set");
        batch.exec().await.unwrap();

        // then
        assert_eq!(get.result().unwrap(), Some(Value::from("bar")));
        set.result().unwrap();
        assert!(!del.result().unwrap());
        assert_eq!(members.result().unwrap(), vec![Value::from("m")]);
        assert_eq!(client.pipelines.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_count_profiled_commands() {
        // given
        let (_, backend) = backend();
        let profiler = Arc::new(crate::BasicProfiler::new());
        let profiled = backend.with_profiler(profiler.clone());

        // when
        profiled.set("a", "1".into()).await.unwrap();
        profiled.get("a").await.unwrap();

        // then
        assert_eq!(profiler.command_count(), 2);
        assert_eq!(profiler.round_trip_count(), 2);
    }
}
