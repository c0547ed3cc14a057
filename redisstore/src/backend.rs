//! The remote data-structure backend implementation.
//!
//! A thin adapter: every store operation maps to one native command. The
//! interesting parts are the float bound grammar, the compare-and-swap
//! script, and the atomic-write script compiler in [`crate::atomic`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use keyvalue::{
    AtomicWriteOperation, BatchOperation, CasTransform, Error, Result, ScoredMember, Value,
};

use crate::atomic::ScriptAtomicWrite;
use crate::batch::PipelineBatchOperation;
use crate::client::{Command, CommandClient, Reply};
use crate::profiler::{Profiler, ProfilingCommandClient};

/// The remote data-structure backend.
#[derive(Clone)]
pub struct Backend {
    pub(crate) client: Arc<dyn CommandClient>,
}

impl Backend {
    pub fn new(client: Arc<dyn CommandClient>) -> Self {
        Self { client }
    }

    /// Returns a backend that profiles every command. Profilers compose.
    pub fn with_profiler(&self, profiler: Arc<dyn Profiler>) -> Self {
        Self {
            client: Arc::new(ProfilingCommandClient::new(Arc::clone(&self.client), profiler)),
        }
    }

    async fn run(&self, command: Command) -> Result<Reply> {
        let name = command.name;
        let reply = self
            .client
            .cmd(command)
            .await
            .map_err(|e| Error::transport("command dispatch", e))?;
        match reply {
            Reply::Error(message) => Err(Error::transport(
                name,
                crate::client::ClientError::new(message),
            )),
            reply => Ok(reply),
        }
    }

    async fn range_command(&self, command: Command) -> Result<Vec<Value>> {
        match self.run(command).await? {
            Reply::Array(replies) => replies
                .into_iter()
                .map(|r| match r {
                    Reply::Data(b) => Ok(Value::Bytes(b)),
                    other => Err(unexpected_reply("bulk member", &other)),
                })
                .collect(),
            other => Err(unexpected_reply("member array", &other)),
        }
    }

    async fn scored_range_command(&self, command: Command) -> Result<Vec<ScoredMember>> {
        let replies = match self.run(command).await? {
            Reply::Array(replies) => replies,
            other => return Err(unexpected_reply("member array", &other)),
        };
        let mut members = Vec::with_capacity(replies.len() / 2);
        let mut iter = replies.into_iter();
        while let Some(member) = iter.next() {
            let value = match member {
                Reply::Data(b) => Value::Bytes(b),
                other => return Err(unexpected_reply("bulk member", &other)),
            };
            let score = match iter.next() {
                Some(Reply::Data(b)) => parse_score(&b)?,
                other => {
                    return Err(Error::Protocol(format!(
                        "member is missing its score: {:?}",
                        other
                    )))
                }
            };
            members.push(ScoredMember { score, value });
        }
        Ok(members)
    }
}

/// Serializes a score bound in the server's float grammar.
pub(crate) fn fmt_score(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", score)
    }
}

fn parse_score(data: &Bytes) -> Result<f64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed score reply: {:?}", data)))
}

fn unexpected_reply(expected: &str, reply: &Reply) -> Error {
    Error::Protocol(format!("expected {}, got {:?}", expected, reply))
}

fn limit_args(command: Command, limit: usize) -> Command {
    if limit > 0 {
        command.arg("LIMIT").arg("0").arg(limit.to_string())
    } else {
        command
    }
}

#[async_trait]
impl keyvalue::Backend for Backend {
    fn batch(&self) -> Box<dyn BatchOperation + '_> {
        Box::new(PipelineBatchOperation::new(self))
    }

    fn atomic_write(&self) -> Box<dyn AtomicWriteOperation + '_> {
        Box::new(ScriptAtomicWrite::new(self))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.run(Command::new("GET").arg(key)).await? {
            Reply::Nil => Ok(None),
            Reply::Data(b) => Ok(Some(Value::Bytes(b))),
            other => Err(unexpected_reply("bulk value", &other)),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.run(Command::new("SET").arg(key).arg(value.as_bytes())).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Value) -> Result<bool> {
        let reply = self
            .run(Command::new("SET").arg(key).arg(value.as_bytes()).arg("NX"))
            .await?;
        Ok(!matches!(reply, Reply::Nil))
    }

    async fn set_xx(&self, key: &str, value: Value) -> Result<bool> {
        let reply = self
            .run(Command::new("SET").arg(key).arg(value.as_bytes()).arg("XX"))
            .await?;
        Ok(!matches!(reply, Reply::Nil))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.run(Command::new("DEL").arg(key)).await? {
            Reply::Int(n) => Ok(n > 0),
            other => Err(unexpected_reply("integer", &other)),
        }
    }

    async fn cas(&self, key: &str, transform: CasTransform<'_>) -> Result<bool> {
        let previous = self.get(key).await?;

        let new_value = match transform(previous.as_ref())? {
            Some(v) => v,
            None => return Ok(true),
        };

        // An equality-guarded swap evaluated server-side keeps the operation
        // serializable per key without connection-pinned state.
        let (script, args) = match previous {
            Some(previous) => (
                "if redis.call('get', KEYS[1]) == ARGV[1] then redis.call('set', KEYS[1], ARGV[2]) return 1 else return 0 end",
                vec![previous.as_bytes(), new_value.as_bytes()],
            ),
            None => (
                "if redis.call('exists', KEYS[1]) == 0 then redis.call('set', KEYS[1], ARGV[1]) return 1 else return 0 end",
                vec![new_value.as_bytes()],
            ),
        };

        let reply = self
            .client
            .eval(script, vec![Bytes::copy_from_slice(key.as_bytes())], args)
            .await
            .map_err(|e| Error::transport("script evaluation", e))?;
        match reply {
            Reply::Int(1) => Ok(true),
            Reply::Int(0) => Ok(false),
            Reply::Error(message) => Err(Error::transport(
                "script evaluation",
                crate::client::ClientError::new(message),
            )),
            other => Err(unexpected_reply("integer", &other)),
        }
    }

    async fn add_int(&self, key: &str, n: i64) -> Result<i64> {
        match self.run(Command::new("INCRBY").arg(key).arg(n.to_string())).await? {
            Reply::Int(new) => Ok(new),
            other => Err(unexpected_reply("integer", &other)),
        }
    }

    async fn s_add(&self, key: &str, members: Vec<Value>) -> Result<()> {
        if members.is_empty() {
            return Err(Error::InvalidArgument("s_add requires at least one member".into()));
        }
        let mut command = Command::new("SADD").arg(key);
        for member in members {
            command = command.arg(member.as_bytes());
        }
        self.run(command).await?;
        Ok(())
    }

    async fn s_rem(&self, key: &str, members: Vec<Value>) -> Result<()> {
        if members.is_empty() {
            return Err(Error::InvalidArgument("s_rem requires at least one member".into()));
        }
        let mut command = Command::new("SREM").arg(key);
        for member in members {
            command = command.arg(member.as_bytes());
        }
        self.run(command).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn s_members(&self, key: &str) -> Result<Vec<Value>> {
        self.range_command(Command::new("SMEMBERS").arg(key)).await
    }

    async fn z_add(&self, key: &str, member: Value, score: f64) -> Result<()> {
        self.run(
            Command::new("ZADD").arg(key).arg(fmt_score(score)).arg(member.as_bytes()),
        )
        .await?;
        Ok(())
    }

    async fn z_score(&self, key: &str, member: Value) -> Result<Option<f64>> {
        match self.run(Command::new("ZSCORE").arg(key).arg(member.as_bytes())).await? {
            Reply::Nil => Ok(None),
            Reply::Data(b) => Ok(Some(parse_score(&b)?)),
            other => Err(unexpected_reply("bulk score", &other)),
        }
    }

    async fn z_rem(&self, key: &str, member: Value) -> Result<()> {
        self.run(Command::new("ZREM").arg(key).arg(member.as_bytes())).await?;
        Ok(())
    }

    async fn z_incr_by(&self, key: &str, member: Value, delta: f64) -> Result<f64> {
        match self
            .run(Command::new("ZINCRBY").arg(key).arg(fmt_score(delta)).arg(member.as_bytes()))
            .await?
        {
            Reply::Data(b) => parse_score(&b),
            other => Err(unexpected_reply("bulk score", &other)),
        }
    }

    async fn z_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let command = Command::new("ZRANGEBYSCORE")
            .arg(key)
            .arg(fmt_score(min))
            .arg(fmt_score(max));
        self.range_command(limit_args(command, limit)).await
    }

    async fn z_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        let command = Command::new("ZRANGEBYSCORE")
            .arg(key)
            .arg(fmt_score(min))
            .arg(fmt_score(max))
            .arg("WITHSCORES");
        self.scored_range_command(limit_args(command, limit)).await
    }

    async fn z_rev_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<Value>> {
        // Reverse ranges take the maximum first.
        let command = Command::new("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(fmt_score(max))
            .arg(fmt_score(min));
        self.range_command(limit_args(command, limit)).await
    }

    async fn z_rev_range_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>> {
        let command = Command::new("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(fmt_score(max))
            .arg(fmt_score(min))
            .arg("WITHSCORES");
        self.scored_range_command(limit_args(command, limit)).await
    }

    async fn z_count(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        match self
            .run(Command::new("ZCOUNT").arg(key).arg(fmt_score(min)).arg(fmt_score(max)))
            .await?
        {
            Reply::Int(n) => Ok(n.max(0) as usize),
            other => Err(unexpected_reply("integer", &other)),
        }
    }

    async fn z_lex_count(&self, key: &str, min: &str, max: &str) -> Result<usize> {
        match self
            .run(
                Command::new("ZLEXCOUNT")
                    .arg(key)
                    .arg(min.to_string())
                    .arg(max.to_string()),
            )
            .await?
        {
            Reply::Int(n) => Ok(n.max(0) as usize),
            other => Err(unexpected_reply("integer", &other)),
        }
    }

    async fn z_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let command = Command::new("ZRANGEBYLEX")
            .arg(key)
            .arg(min.to_string())
            .arg(max.to_string());
        self.range_command(limit_args(command, limit)).await
    }

    async fn z_rev_range_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let command = Command::new("ZREVRANGEBYLEX")
            .arg(key)
            .arg(max.to_string())
            .arg(min.to_string());
        self.range_command(limit_args(command, limit)).await
    }
}
