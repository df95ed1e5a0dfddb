//! The `Cli` capability and its implementations.
//!
//! A channel is a linear chain: every decorator implements [`Cli`] and owns
//! exactly one inner `Cli`, down to the [`PromptAwareCli`] that drives the
//! session. Errors from below pass through every layer unchanged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::command::Command;
use crate::error::CliError;

pub use logging::LoggingCli;
pub use prompt::{CliState, PromptAwareCli, PromptOptions};
pub use read_cache::{ReadCache, ReadCachingCli};
pub use tree_cache::{TreeCache, TreeCachingCli, TreePath};

/// Executes commands against a device shell.
#[async_trait]
pub trait Cli: Send + Sync {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError>;

    async fn execute_write(&self, command: &Command) -> Result<String, CliError>;

    /// Releases the session. Later calls fail with [`CliError::Closed`].
    async fn destroy(&self) -> Result<(), CliError>;
}

#[async_trait]
impl<C: Cli + ?Sized> Cli for Box<C> {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        (**self).execute_read(command).await
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        (**self).execute_write(command).await
    }

    async fn destroy(&self) -> Result<(), CliError> {
        (**self).destroy().await
    }
}

#[async_trait]
impl<C: Cli + ?Sized> Cli for Arc<C> {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        (**self).execute_read(command).await
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        (**self).execute_write(command).await
    }

    async fn destroy(&self) -> Result<(), CliError> {
        (**self).destroy().await
    }
}

mod logging;
mod prompt;
mod read_cache;
mod tree_cache;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Notify;

    /// In-memory `Cli` answering from a table and counting round-trips.
    #[derive(Default)]
    pub(crate) struct FakeCli {
        pub(crate) responses: Mutex<HashMap<String, String>>,
        pub(crate) reads: AtomicUsize,
        pub(crate) writes: AtomicUsize,
        pub(crate) fail_writes: bool,
    }

    impl FakeCli {
        pub(crate) fn with(responses: &[(&str, &str)]) -> Self {
            let cli = Self::default();
            for (command, output) in responses {
                cli.set(command, output);
            }
            cli
        }

        pub(crate) fn set(&self, command: &str, output: &str) {
            self.responses
                .lock()
                .expect("responses lock")
                .insert(command.to_string(), output.to_string());
        }

        pub(crate) fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Cli for FakeCli {
        async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("responses lock")
                .get(command.raw())
                .cloned()
                .ok_or_else(|| CliError::Io(format!("no response for {}", command.raw())))
        }

        async fn execute_write(&self, _command: &Command) -> Result<String, CliError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(CliError::Io("write rejected".to_string()));
            }
            Ok(String::new())
        }

        async fn destroy(&self) -> Result<(), CliError> {
            Ok(())
        }
    }

    /// A [`FakeCli`] whose first read answers with the output current when
    /// it started, then holds until `release` is notified.
    pub(crate) struct HeldReadCli {
        pub(crate) fake: FakeCli,
        pub(crate) started: Notify,
        pub(crate) release: Notify,
        hold: AtomicBool,
    }

    impl HeldReadCli {
        pub(crate) fn new(fake: FakeCli) -> Self {
            Self {
                fake,
                started: Notify::new(),
                release: Notify::new(),
                hold: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl Cli for HeldReadCli {
        async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
            let output = self.fake.execute_read(command).await;
            if self.hold.swap(false, Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            output
        }

        async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
            self.fake.execute_write(command).await
        }

        async fn destroy(&self) -> Result<(), CliError> {
            Ok(())
        }
    }
}
