//! Remote data-structure server client seam.
//!
//! The server speaks a command protocol with a small set of reply shapes;
//! [`Reply`] mirrors them. The client itself is an external collaborator:
//! the backend is written against the [`CommandClient`] trait.

use async_trait::async_trait;
use bytes::Bytes;

/// A server command: a name plus its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self { name, args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }
}

/// A server reply.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Nil,
    Int(i64),
    Data(Bytes),
    Simple(String),
    Array(Vec<Reply>),
    /// A command-level error reported by the server.
    Error(String),
}

/// A transport-level client failure.
#[derive(Clone, Debug)]
pub struct ClientError {
    pub message: String,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.message.fmt(f)
    }
}

impl std::error::Error for ClientError {}

/// The data-structure server client the backend is written against.
#[async_trait]
pub trait CommandClient: Send + Sync {
    /// Runs one command.
    async fn cmd(&self, command: Command) -> Result<Reply, ClientError>;

    /// Runs several commands over one round trip, returning one reply per
    /// command.
    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, ClientError>;

    /// Evaluates a server-side script with the given key and argument
    /// bindings.
    async fn eval(&self, script: &str, keys: Vec<Bytes>, args: Vec<Bytes>)
        -> Result<Reply, ClientError>;
}
