//! Plugin and model registries.
//!
//! [`PluginRegistry`] picks the translation logic for a device type and
//! version; [`ModelRegistry`] shares one parsed schema per model bundle
//! across every device of the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::translation::{ReaderRegistry, WriterRegistry};

pub use model::{BindingContext, MODEL_REGISTRY, Model, ModelRegistry};
pub use schema::SchemaContext;

mod model;
mod schema;

/// Device family plus software version.
///
/// A registered version may be `*` or end with `*` (`15.*`) to cover every
/// version with that prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DeviceType {
    pub family: String,
    pub version: String,
}

impl DeviceType {
    pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            version: version.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.version.ends_with('*')
    }

    /// True when this (possibly wildcard) type covers `concrete`.
    pub fn matches(&self, concrete: &DeviceType) -> bool {
        if self.family != concrete.family {
            return false;
        }
        match self.version.strip_suffix('*') {
            Some(prefix) => concrete.version.starts_with(prefix),
            None => self.version == concrete.version,
        }
    }

    /// Longer fixed prefixes are more specific; exact versions beat every
    /// wildcard.
    fn specificity(&self) -> usize {
        match self.version.strip_suffix('*') {
            Some(prefix) => prefix.len(),
            None => usize::MAX,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.version)
    }
}

/// Translation logic for one device type.
pub trait Plugin: Send + Sync {
    /// The type this plugin is registered under; the version may be a
    /// wildcard.
    fn device_type(&self) -> DeviceType;

    fn provide_readers(&self, registry: &mut ReaderRegistry);

    fn provide_writers(&self, registry: &mut WriterRegistry);
}

/// The plugin chosen for one concrete device.
#[derive(Clone)]
pub struct DeviceContext {
    device_type: DeviceType,
    plugin: Arc<dyn Plugin>,
}

impl DeviceContext {
    /// The type the plugin was registered under.
    pub fn plugin_type(&self) -> DeviceType {
        self.plugin.device_type()
    }

    /// The concrete type that was looked up.
    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    pub fn provide_readers(&self) -> ReaderRegistry {
        let mut registry = ReaderRegistry::new();
        self.plugin.provide_readers(&mut registry);
        registry
    }

    pub fn provide_writers(&self) -> WriterRegistry {
        let mut registry = WriterRegistry::new();
        self.plugin.provide_writers(&mut registry);
        registry
    }
}

/// Plugins keyed by the device type they declare.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<DeviceType, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let device_type = plugin.device_type();
        let mut plugins = self
            .plugins
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if plugins.contains_key(&device_type) {
            return Err(RegistryError::DuplicatePlugin(device_type));
        }
        debug!("plugin registered for {}", device_type);
        plugins.insert(device_type, plugin);
        Ok(())
    }

    /// Exact match first, then the most specific wildcard of the family.
    pub fn get_device_context(&self, device_type: &DeviceType) -> Result<DeviceContext, RegistryError> {
        let plugins = self
            .plugins
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let plugin = plugins.get(device_type).or_else(|| {
            plugins
                .iter()
                .filter(|(registered, _)| registered.matches(device_type))
                .max_by_key(|(registered, _)| registered.specificity())
                .map(|(_, plugin)| plugin)
        });
        match plugin {
            Some(plugin) => Ok(DeviceContext {
                device_type: device_type.clone(),
                plugin: plugin.clone(),
            }),
            None => Err(RegistryError::NoPlugin(device_type.clone())),
        }
    }

    pub fn registered_types(&self) -> Vec<DeviceType> {
        let plugins = self
            .plugins
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut types: Vec<DeviceType> = plugins.keys().cloned().collect();
        types.sort_by(|a, b| (&a.family, &a.version).cmp(&(&b.family, &b.version)));
        types
    }
}
