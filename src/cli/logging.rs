use super::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs every call with the channel id and a per-channel invocation id.
pub struct LoggingCli<C> {
    inner: C,
    channel_id: String,
    invocations: AtomicU64,
}

impl<C: Cli> LoggingCli<C> {
    pub fn new(inner: C, channel_id: impl Into<String>) -> Self {
        Self {
            inner,
            channel_id: channel_id.into(),
            invocations: AtomicU64::new(0),
        }
    }

    /// Number of calls seen so far.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl<C: Cli> Cli for LoggingCli<C> {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        let id = self.next_id();
        debug!("[{}] #{} read '{}'", self.channel_id, id, command);
        match self.inner.execute_read(command).await {
            Ok(output) => {
                debug!(
                    "[{}] #{} read done, {} bytes",
                    self.channel_id,
                    id,
                    output.len()
                );
                Ok(output)
            }
            Err(err) => {
                warn!("[{}] #{} read '{}' failed: {}", self.channel_id, id, command, err);
                Err(err)
            }
        }
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        let id = self.next_id();
        debug!("[{}] #{} write '{}'", self.channel_id, id, command.raw().escape_debug());
        match self.inner.execute_write(command).await {
            Ok(output) => {
                debug!("[{}] #{} write done", self.channel_id, id);
                Ok(output)
            }
            Err(err) => {
                warn!(
                    "[{}] #{} write '{}' failed: {}",
                    self.channel_id,
                    id,
                    command.raw().escape_debug(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn destroy(&self) -> Result<(), CliError> {
        let result = self.inner.destroy().await;
        debug!("[{}] destroyed", self.channel_id);
        result
    }
}
