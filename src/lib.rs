//! # devgate - CLI transport and translation core for network devices
//!
//! `devgate` talks to network devices over interactive SSH shells and turns
//! their text output into one structured tree. It provides a layered `Cli`
//! abstraction with prompt detection and caching, transactional datastores
//! with diffing, and registries that pick the translation plugin for a
//! device type and share parsed models across devices.
//!
//! ## Features
//!
//! - **Prompt-Aware Channels**: one worker per device resolves the prompt,
//!   serializes commands and reconnects with backoff
//! - **Layered Caching**: a read cache invalidated by every write, and a
//!   running-config tree cache that only drops the sections a write touches
//! - **Transactional Datastores**: staged overwrite/merge/delete, leaf and
//!   registered-path diffs, atomic commit
//! - **Plugins**: readers build operational state, writers push config diffs
//!   with compensating rollback on failure
//! - **Offline Replay**: scripted sessions stand in for real devices in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use devgate::channel::ChannelBuilder;
//! use devgate::config::ChannelConfig;
//! use devgate::device::{CliDevice, DeviceId};
//! use devgate::plugins::UbiquitiInterfacePlugin;
//! use devgate::registry::{DeviceType, MODEL_REGISTRY, Model, PluginRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plugins = PluginRegistry::new();
//!     plugins.register_plugin(Arc::new(UbiquitiInterfacePlugin))?;
//!     let context = plugins.get_device_context(&DeviceType::new("ubiquiti", "1.8.2"))?;
//!
//!     let model = Model::new("openconfig", "2.4.3", "/var/lib/devgate/models/openconfig");
//!     let schema = MODEL_REGISTRY.get_schema_context(&model)?;
//!
//!     let config = ChannelConfig::new("192.168.1.2", "admin", "password");
//!     let channel = ChannelBuilder::new(config.target(), config).build();
//!     let device = CliDevice::new(DeviceId::new("edge-sw-1"), channel, &context, schema);
//!
//!     let state = device.get_state().await;
//!     println!("{}", serde_json::to_string_pretty(&state)?);
//!     device.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`channel::ChannelBuilder`] - composes the `Cli` decorator chain for one device
//! - [`cli::PromptAwareCli`] - FIFO command execution over one session
//! - [`datastore::Datastore`] - committed tree plus single-transaction guard
//! - [`registry::PluginRegistry`] / [`registry::ModelRegistry`] - plugin and model lookup
//! - [`device::CliDevice`] - binds channel, plugin and datastores together
//! - [`error`] - error types per layer
//! - [`config`] - channel configuration and SSH algorithm tiers

pub mod channel;
pub mod cli;
pub mod command;
pub mod config;
pub mod datastore;
pub mod device;
pub mod error;
pub mod plugins;
pub mod registry;
pub mod session;
pub mod timekeeper;
pub mod translation;
