//! Channel assembly.
//!
//! A [`Channel`] is the fully composed `Cli` for one device:
//!
//! ```text
//! LoggingCli -> ReadCachingCli -> TreeCachingCli -> PromptAwareCli -> Session
//! ```
//!
//! Both caches are optional and controlled by [`ChannelConfig`]. The channel
//! keeps handles to them so a full resync can drop cached output without
//! rebuilding the chain.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::cli::{
    Cli, CliState, LoggingCli, PromptAwareCli, PromptOptions, ReadCache, ReadCachingCli,
    TreeCache, TreeCachingCli,
};
use crate::command::Command;
use crate::config::ChannelConfig;
use crate::error::CliError;
use crate::session::{SessionFactory, SessionRecorder, SshSessionFactory};

/// Builds a [`Channel`] from a [`ChannelConfig`].
pub struct ChannelBuilder {
    id: String,
    config: ChannelConfig,
    factory: Option<Arc<dyn SessionFactory>>,
    recorder: Option<SessionRecorder>,
}

impl ChannelBuilder {
    pub fn new(id: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            id: id.into(),
            config,
            factory: None,
            recorder: None,
        }
    }

    /// Replaces the SSH transport, e.g. with a replay factory in tests.
    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Records SSH session events. Ignored when a custom factory is set.
    pub fn recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Composes the chain. Must be called inside a Tokio runtime because the
    /// channel worker is spawned immediately.
    pub fn build(self) -> Channel {
        let ChannelBuilder {
            id,
            config,
            factory,
            recorder,
        } = self;

        let factory = factory.unwrap_or_else(|| {
            let ssh = SshSessionFactory::new(config.clone());
            match recorder {
                Some(recorder) => Arc::new(ssh.with_recorder(recorder)),
                None => Arc::new(ssh),
            }
        });
        let transport = Arc::new(PromptAwareCli::new(factory, PromptOptions::from(&config)));

        let mut cli: Box<dyn Cli> = Box::new(transport.clone());
        let tree_cache = config.tree_cache.enabled.then(|| TreeCache::new(&config.tree_cache));
        if let Some(cache) = &tree_cache {
            cli = Box::new(TreeCachingCli::new(cli, cache.clone(), &id));
        }
        let read_cache = config.read_cache.enabled.then(|| ReadCache::new(&config.read_cache));
        if let Some(cache) = &read_cache {
            cli = Box::new(ReadCachingCli::new(cli, cache.clone(), &id));
        }
        let cli: Arc<dyn Cli> = Arc::new(LoggingCli::new(cli, &id));

        debug!(
            "[{}] channel built, read cache {}, tree cache {}",
            id,
            read_cache.is_some(),
            tree_cache.is_some()
        );
        Channel {
            id,
            config,
            cli,
            transport,
            read_cache,
            tree_cache,
        }
    }
}

/// One device's composed `Cli` plus handles to its caches.
pub struct Channel {
    id: String,
    config: ChannelConfig,
    cli: Arc<dyn Cli>,
    transport: Arc<PromptAwareCli>,
    read_cache: Option<ReadCache>,
    tree_cache: Option<TreeCache>,
}

impl Channel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The outermost `Cli`, shareable with plugins.
    pub fn cli(&self) -> Arc<dyn Cli> {
        self.cli.clone()
    }

    pub fn state(&self) -> CliState {
        self.transport.state()
    }

    pub fn prompt(&self) -> Option<String> {
        self.transport.prompt()
    }

    /// Drops all cached output so the next reads hit the device.
    pub fn clear_caches(&self) {
        if let Some(cache) = &self.read_cache {
            cache.invalidate_all();
        }
        if let Some(cache) = &self.tree_cache {
            cache.clear();
        }
        debug!("[{}] caches cleared", self.id);
    }
}

#[async_trait]
impl Cli for Channel {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        self.cli.execute_read(command).await
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        self.cli.execute_write(command).await
    }

    async fn destroy(&self) -> Result<(), CliError> {
        self.cli.destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ReplayScript, ReplaySessionFactory};

    fn config() -> ChannelConfig {
        let mut config = ChannelConfig::new("10.0.0.1", "admin", "secret");
        config.prompt_idle_ms = 50;
        config.command_timeout_secs = 2;
        config.read_cache.enabled = true;
        config.tree_cache.enabled = true;
        config
    }

    fn factory() -> Arc<ReplaySessionFactory> {
        Arc::new(ReplaySessionFactory::new(
            ReplayScript::new("(UBNT) #")
                .with_response("show version", "1.8.2")
                .with_response(
                    "show running-config",
                    "hostname sw1\ninterface 0/1\nmtu 9000\nexit",
                ),
        ))
    }

    fn sent(factory: &ReplaySessionFactory, command: &str) -> usize {
        factory
            .recorder()
            .written()
            .iter()
            .filter(|written| written.as_str() == command)
            .count()
    }

    #[tokio::test]
    async fn caches_sit_in_front_of_the_device() {
        let factory = factory();
        let channel = ChannelBuilder::new("sw1", config())
            .session_factory(factory.clone())
            .build();

        let version = Command::read("show version");
        assert_eq!(channel.execute_read(&version).await.expect("read"), "1.8.2");
        assert_eq!(channel.execute_read(&version).await.expect("read"), "1.8.2");
        assert_eq!(sent(&factory, "show version"), 1);

        channel
            .execute_read(&Command::read("show running-config"))
            .await
            .expect("running config");
        let ifc = channel
            .execute_read(&Command::read("show running-config interface 0/1"))
            .await
            .expect("synthesized");
        assert_eq!(ifc, "interface 0/1\nmtu 9000\nexit");
        assert_eq!(sent(&factory, "show running-config interface 0/1"), 0);

        channel.clear_caches();
        channel.execute_read(&version).await.expect("read");
        assert_eq!(sent(&factory, "show version"), 2);

        channel.destroy().await.expect("destroy");
        assert_eq!(channel.state(), CliState::Closed);
        assert!(matches!(
            channel.execute_read(&Command::read("show clock")).await,
            Err(CliError::Closed)
        ));
    }

    #[tokio::test]
    async fn disabled_caches_forward_every_read() {
        let factory = factory();
        let mut config = config();
        config.read_cache.enabled = false;
        config.tree_cache.enabled = false;
        let channel = ChannelBuilder::new("sw1", config)
            .session_factory(factory.clone())
            .build();

        let version = Command::read("show version");
        channel.execute_read(&version).await.expect("read");
        channel.execute_read(&version).await.expect("read");
        assert_eq!(sent(&factory, "show version"), 2);
        assert_eq!(channel.prompt().as_deref(), Some("(UBNT) #"));
    }
}
