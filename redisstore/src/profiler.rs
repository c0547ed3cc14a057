//! Per-command profiling for the command client.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use crate::client::{ClientError, Command, CommandClient, Reply};

/// Observer of command dispatches.
pub trait Profiler: Send + Sync {
    /// Records one command and the time spent across the underlying call.
    fn add_command_profile(&self, command: &'static str, duration: Duration);

    /// Records one pipeline round trip carrying `commands` commands.
    fn add_pipeline_profile(&self, commands: usize, duration: Duration);
}

/// A profiler backed by atomic counters.
#[derive(Default)]
pub struct BasicProfiler {
    command_count: AtomicI64,
    round_trip_count: AtomicI64,
    command_nanos: AtomicI64,
}

impl BasicProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_count(&self) -> i64 {
        self.command_count.load(Ordering::SeqCst)
    }

    pub fn round_trip_count(&self) -> i64 {
        self.round_trip_count.load(Ordering::SeqCst)
    }

    pub fn command_duration(&self) -> Duration {
        Duration::from_nanos(self.command_nanos.load(Ordering::SeqCst).max(0) as u64)
    }
}

impl Profiler for BasicProfiler {
    fn add_command_profile(&self, _command: &'static str, duration: Duration) {
        self.command_count.fetch_add(1, Ordering::SeqCst);
        self.round_trip_count.fetch_add(1, Ordering::SeqCst);
        self.command_nanos.fetch_add(duration.as_nanos() as i64, Ordering::SeqCst);
    }

    fn add_pipeline_profile(&self, commands: usize, duration: Duration) {
        self.command_count.fetch_add(commands as i64, Ordering::SeqCst);
        self.round_trip_count.fetch_add(1, Ordering::SeqCst);
        self.command_nanos.fetch_add(duration.as_nanos() as i64, Ordering::SeqCst);
    }
}

/// A [`CommandClient`] that reports every dispatch to a [`Profiler`].
pub struct ProfilingCommandClient {
    client: Arc<dyn CommandClient>,
    profiler: Arc<dyn Profiler>,
}

impl ProfilingCommandClient {
    pub fn new(client: Arc<dyn CommandClient>, profiler: Arc<dyn Profiler>) -> Self {
        Self { client, profiler }
    }
}

#[async_trait]
impl CommandClient for ProfilingCommandClient {
    async fn cmd(&self, command: Command) -> Result<Reply, ClientError> {
        let name = command.name;
        let start = Instant::now();
        let reply = self.client.cmd(command).await;
        self.profiler.add_command_profile(name, start.elapsed());
        reply
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, ClientError> {
        let count = commands.len();
        let start = Instant::now();
        let replies = self.client.pipeline(commands).await;
        self.profiler.add_pipeline_profile(count, start.elapsed());
        replies
    }

    async fn eval(
        &self,
        script: &str,
        keys: Vec<Bytes>,
        args: Vec<Bytes>,
    ) -> Result<Reply, ClientError> {
        let start = Instant::now();
        let reply = self.client.eval(script, keys, args).await;
        self.profiler.add_command_profile("EVAL", start.elapsed());
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_count_pipeline_commands_against_one_round_trip() {
        // given
        let profiler = BasicProfiler::new();

        // when
        profiler.add_command_profile("GET", Duration::from_millis(1));
        profiler.add_pipeline_profile(4, Duration::from_millis(2));

        // then
        assert_eq!(profiler.command_count(), 5);
        assert_eq!(profiler.round_trip_count(), 2);
        assert_eq!(profiler.command_duration(), Duration::from_millis(3));
    }
}
