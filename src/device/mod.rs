//! Device boundary.
//!
//! A [`CliDevice`] binds one [`Channel`] to the readers and writers of its
//! plugin and to a pair of datastores. Failures stop here: they are logged,
//! kept in an [`ErrorQueue`], and the device is reported unavailable with
//! its last known state.

use std::fmt;
use std::sync::Arc;

use log::{debug, error};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::channel::Channel;
use crate::cli::Cli;
use crate::command::Command;
use crate::datastore::{Datastore, DatastoreType, Path};
use crate::error::{CliError, DatastoreError, TranslationError};
use crate::registry::{DeviceContext, SchemaContext};
use crate::translation::{CommitReport, ConfigCommitter, ReaderRegistry, WriterRegistry};

pub use errors::{DeviceError, ErrorQueue};

mod errors;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What readers and writers get to talk to their device.
#[derive(Clone)]
pub struct DeviceAccess {
    cli: Arc<dyn Cli>,
    id: DeviceId,
    executor: Handle,
}

impl DeviceAccess {
    pub fn new(cli: Arc<dyn Cli>, id: DeviceId, executor: Handle) -> Self {
        Self { cli, id, executor }
    }

    pub fn cli(&self) -> &Arc<dyn Cli> {
        &self.cli
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Runtime for work that must outlive the current call.
    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    pub async fn read(&self, command: impl Into<String>) -> Result<String, CliError> {
        self.cli.execute_read(&Command::read(command)).await
    }

    pub async fn write(&self, command: impl Into<String>) -> Result<String, CliError> {
        self.cli.execute_write(&Command::write(command)).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceStatus {
    Available,
    /// The last refresh failed; the reported state is stale.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub id: DeviceId,
    #[serde(flatten)]
    pub status: DeviceStatus,
    pub state: Value,
}

/// A device managed over its CLI.
pub struct CliDevice {
    access: DeviceAccess,
    channel: Channel,
    readers: ReaderRegistry,
    writers: WriterRegistry,
    operational: Datastore,
    config: Datastore,
    errors: ErrorQueue,
    busy: Mutex<()>,
}

impl CliDevice {
    /// Must be called inside a Tokio runtime.
    pub fn new(id: DeviceId, channel: Channel, context: &DeviceContext, schema: Arc<SchemaContext>) -> Self {
        let access = DeviceAccess::new(channel.cli(), id, Handle::current());
        let errors = ErrorQueue::new(channel.config().error_queue_capacity);
        let readers = context.provide_readers();
        let writers = context.provide_writers();
        debug!(
            "[{}] device bound to {} plugin, {} readers, {} writers",
            access.id(),
            context.plugin_type(),
            readers.len(),
            writers.len()
        );
        Self {
            access,
            channel,
            readers,
            writers,
            operational: Datastore::new(DatastoreType::Operational, schema.clone()),
            config: Datastore::new(DatastoreType::Config, schema),
            errors,
            busy: Mutex::new(()),
        }
    }

    pub fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.errors = ErrorQueue::new(capacity);
        self
    }

    pub fn id(&self) -> &DeviceId {
        self.access.id()
    }

    pub fn access(&self) -> &DeviceAccess {
        &self.access
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn operational(&self) -> &Datastore {
        &self.operational
    }

    /// Re-reads the device and reports its state. A failed refresh reports
    /// the device unavailable with the state of the last successful one.
    pub async fn get_state(&self) -> DeviceState {
        let status = match self.refresh().await {
            Ok(()) => DeviceStatus::Available,
            Err(err) => {
                self.record(format!("state refresh failed: {err}"));
                DeviceStatus::Unavailable {
                    reason: err.to_string(),
                }
            }
        };
        DeviceState {
            id: self.access.id().clone(),
            status,
            state: self.operational.snapshot(),
        }
    }

    /// Rebuilds the operational tree from fresh device output.
    pub async fn refresh(&self) -> Result<(), TranslationError> {
        let _busy = self.busy.lock().await;
        self.channel.clear_caches();
        let mut tx = self.operational.new_tx()?;
        tx.delete(&Path::root())?;
        self.readers.read_all(&self.access, &mut tx).await?;
        match tx.commit() {
            Ok(()) => Ok(()),
            Err(DatastoreError::EmptyCommit) => {
                debug!("[{}] operational state unchanged", self.access.id());
                tx.abort()?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the difference between the current and `intended`
    /// configuration to the device.
    pub async fn apply_config(&self, intended: Value) -> Result<CommitReport, TranslationError> {
        let _busy = self.busy.lock().await;
        let result = ConfigCommitter::new(&self.writers, &self.access)
            .apply(&self.config, intended)
            .await;
        if let Err(err) = &result {
            self.record(format!("config apply failed: {err}"));
        }
        result
    }

    /// Replaces the stored configuration without touching the device, e.g.
    /// with configuration discovered at startup.
    pub async fn load_config(&self, config: Value) -> Result<(), TranslationError> {
        let _busy = self.busy.lock().await;
        let mut tx = self.config.new_tx()?;
        tx.overwrite(&Path::root(), config)?;
        match tx.commit() {
            Ok(()) => Ok(()),
            Err(DatastoreError::EmptyCommit) => {
                tx.abort()?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn config_snapshot(&self) -> Value {
        self.config.snapshot()
    }

    pub fn recent_errors(&self) -> Vec<DeviceError> {
        self.errors.recent()
    }

    pub async fn shutdown(&self) -> Result<(), CliError> {
        debug!("[{}] shutting down", self.access.id());
        self.channel.destroy().await
    }

    fn record(&self, message: String) {
        error!("[{}] {}", self.access.id(), message);
        self.errors.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelBuilder;
    use crate::config::ChannelConfig;
    use crate::registry::{DeviceType, Plugin, PluginRegistry};
    use crate::session::{ReplayScript, ReplaySessionFactory};
    use crate::translation::Reader;
    use async_trait::async_trait;
    use serde_json::json;

    struct Hostname;

    #[async_trait]
    impl Reader for Hostname {
        async fn read(&self, _path: &Path, device: &DeviceAccess) -> anyhow::Result<Value> {
            let output = device.read("show hostname").await?;
            Ok(json!({ "hostname": output.trim() }))
        }
    }

    struct HostnamePlugin;

    impl Plugin for HostnamePlugin {
        fn device_type(&self) -> DeviceType {
            DeviceType::new("test", "*")
        }

        fn provide_readers(&self, registry: &mut ReaderRegistry) {
            let path = Path::parse("/system:system").expect("path");
            registry.add(path, Hostname);
        }

        fn provide_writers(&self, _registry: &mut WriterRegistry) {}
    }

    fn device(factory: Arc<ReplaySessionFactory>) -> CliDevice {
        let mut config = ChannelConfig::new("10.0.0.9", "admin", "secret");
        config.prompt_idle_ms = 50;
        config.command_timeout_secs = 2;
        let channel = ChannelBuilder::new("dev1", config)
            .session_factory(factory)
            .build();
        let plugins = PluginRegistry::new();
        plugins.register_plugin(Arc::new(HostnamePlugin)).expect("register");
        let context = plugins
            .get_device_context(&DeviceType::new("test", "1.0"))
            .expect("context");
        CliDevice::new(
            DeviceId::new("dev1"),
            channel,
            &context,
            Arc::new(SchemaContext::empty()),
        )
        .with_error_capacity(3)
    }

    #[tokio::test]
    async fn unreachable_device_reports_stale_state() {
        let factory = Arc::new(ReplaySessionFactory::new(
            ReplayScript::new("dev1#").with_response("show hostname", "edge-1"),
        ));
        let device = device(factory.clone());

        let state = device.get_state().await;
        assert_eq!(state.status, DeviceStatus::Available);
        assert_eq!(state.state, json!({ "system:system": { "hostname": "edge-1" } }));

        device.shutdown().await.expect("shutdown");
        let state = device.get_state().await;
        assert!(matches!(state.status, DeviceStatus::Unavailable { .. }));
        assert_eq!(state.state, json!({ "system:system": { "hostname": "edge-1" } }));
        assert_eq!(device.recent_errors().len(), 1);
        assert!(device.recent_errors()[0].message.contains("state refresh failed"));
    }

    #[tokio::test]
    async fn unchanged_refresh_is_not_an_error() {
        let factory = Arc::new(ReplaySessionFactory::new(
            ReplayScript::new("dev1#").with_response("show hostname", "edge-1"),
        ));
        let device = device(factory);
        device.refresh().await.expect("first refresh");
        device.refresh().await.expect("second refresh");
        assert!(device.recent_errors().is_empty());
    }

    #[tokio::test]
    async fn load_config_does_not_touch_the_device() {
        let factory = Arc::new(ReplaySessionFactory::new(ReplayScript::new("dev1#")));
        let device = device(factory.clone());
        device
            .load_config(json!({ "system:system": { "hostname": "edge-1" } }))
            .await
            .expect("load");
        assert_eq!(device.config_snapshot()["system:system"]["hostname"], "edge-1");
        assert_eq!(factory.connection_attempts(), 0);
    }
}
