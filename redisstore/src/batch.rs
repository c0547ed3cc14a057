//! Batched dispatch over a command pipeline.

use async_trait::async_trait;

use keyvalue::{BatchOperation, BatchResult, Error, Result, Value};

use crate::backend::{fmt_score, Backend};
use crate::client::{Command, Reply};

enum PendingReply {
    Get(BatchResult<Option<Value>>),
    Delete(BatchResult<bool>),
    Members(BatchResult<Vec<Value>>),
    Unit(BatchResult<()>),
}

/// Queues commands and dispatches them over one pipeline round trip.
pub(crate) struct PipelineBatchOperation<'a> {
    backend: &'a Backend,
    commands: Vec<Command>,
    pending: Vec<PendingReply>,
}

impl<'a> PipelineBatchOperation<'a> {
    pub(crate) fn new(backend: &'a Backend) -> Self {
        Self { backend, commands: Vec::new(), pending: Vec::new() }
    }

    fn unit(&mut self, command: Command) -> BatchResult<()> {
        let result = BatchResult::new();
        self.commands.push(command);
        self.pending.push(PendingReply::Unit(result.clone()));
        result
    }
}

fn decode_members(reply: Reply) -> Result<Vec<Value>> {
    match reply {
        Reply::Array(replies) => replies
            .into_iter()
            .map(|r| match r {
                Reply::Data(b) => Ok(Value::Bytes(b)),
                other => Err(Error::Protocol(format!("expected bulk member, got {:?}", other))),
            })
            .collect(),
        other => Err(Error::Protocol(format!("expected member array, got {:?}", other))),
    }
}

#[async_trait]
impl BatchOperation for PipelineBatchOperation<'_> {
    fn get(&mut self, key: &str) -> BatchResult<Option<Value>> {
        let result = BatchResult::new();
        self.commands.push(Command::new("GET").arg(key));
        self.pending.push(PendingReply::Get(result.clone()));
        result
    }

    fn delete(&mut self, key: &str) -> BatchResult<bool> {
        let result = BatchResult::new();
        self.commands.push(Command::new("DEL").arg(key));
        self.pending.push(PendingReply::Delete(result.clone()));
        result
    }

    fn set(&mut self, key: &str, value: Value) -> BatchResult<()> {
        let command = Command::new("SET").arg(key).arg(value.as_bytes());
        self.unit(command)
    }

    fn s_members(&mut self, key: &str) -> BatchResult<Vec<Value>> {
        let result = BatchResult::new();
        self.commands.push(Command::new("SMEMBERS").arg(key));
        self.pending.push(PendingReply::Members(result.clone()));
        result
    }

    fn s_add(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        let mut command = Command::new("SADD").arg(key);
        for member in &members {
            command = command.arg(member.as_bytes());
        }
        self.unit(command)
    }

    fn s_rem(&mut self, key: &str, members: Vec<Value>) -> BatchResult<()> {
        let mut command = Command::new("SREM").arg(key);
        for member in &members {
            command = command.arg(member.as_bytes());
        }
        self.unit(command)
    }

    fn z_add(&mut self, key: &str, member: Value, score: f64) -> BatchResult<()> {
        let command = Command::new("ZADD").arg(key).arg(fmt_score(score)).arg(member.as_bytes());
        self.unit(command)
    }

    fn z_rem(&mut self, key: &str, member: Value) -> BatchResult<()> {
        let command = Command::new("ZREM").arg(key).arg(member.as_bytes());
        self.unit(command)
    }

    async fn exec(self: Box<Self>) -> Result<()> {
        if self.commands.is_empty() {
            return Ok(());
        }

        let replies = self
            .backend
            .client
            .pipeline(self.commands)
            .await
            .map_err(|e| Error::transport("pipeline dispatch", e))?;
        if replies.len() != self.pending.len() {
            return Err(Error::Protocol("pipeline reply count mismatch".into()));
        }

        let mut first_error = None;
        for (reply, pending) in replies.into_iter().zip(self.pending) {
            if let Reply::Error(message) = &reply {
                let err = Error::transport(
                    "pipeline command",
                    crate::client::ClientError::new(message.clone()),
                );
                if first_error.is_none() {
                    first_error = Some(err.clone());
                }
                match pending {
                    PendingReply::Get(result) => result.fill(Err(err)),
                    PendingReply::Delete(result) => result.fill(Err(err)),
                    PendingReply::Members(result) => result.fill(Err(err)),
                    PendingReply::Unit(result) => result.fill(Err(err)),
                }
                continue;
            }

            match pending {
                PendingReply::Get(result) => {
                    let value = match reply {
                        Reply::Nil => Ok(None),
                        Reply::Data(b) => Ok(Some(Value::Bytes(b))),
                        other => {
                            Err(Error::Protocol(format!("expected bulk value, got {:?}", other)))
                        }
                    };
                    if let Err(err) = &value {
                        if first_error.is_none() {
                            first_error = Some(err.clone());
                        }
                    }
                    result.fill(value);
                }
                PendingReply::Delete(result) => {
                    let deleted = match reply {
                        Reply::Int(n) => Ok(n > 0),
                        other => Err(Error::Protocol(format!("expected integer, got {:?}", other))),
                    };
                    if let Err(err) = &deleted {
                        if first_error.is_none() {
                            first_error = Some(err.clone());
                        }
                    }
                    result.fill(deleted);
                }
                PendingReply::Members(result) => {
                    let members = decode_members(reply);
                    if let Err(err) = &members {
                        if first_error.is_none() {
                            first_error = Some(err.clone());
                        }
                    }
                    result.fill(members);
                }
                PendingReply::Unit(result) => {
                    result.fill(Ok(()));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
