use super::*;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::datastore::{BindingAwareDatastore, BindingCodec, Datastore, DatastoreType};

/// A versioned bundle of YANG modules stored in one directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Model {
    name: String,
    version: String,
    dir: PathBuf,
}

impl Model {
    pub fn new(name: impl Into<String>, version: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dir: dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dir(&self) -> &FsPath {
        &self.dir
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Everything typed access to one model needs.
#[derive(Debug)]
pub struct BindingContext {
    model: Model,
    schema: Arc<SchemaContext>,
    codec: BindingCodec,
}

impl BindingContext {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn schema(&self) -> &Arc<SchemaContext> {
        &self.schema
    }

    pub fn codec(&self) -> BindingCodec {
        self.codec
    }

    /// A fresh datastore of `kind` over this model.
    pub fn datastore(&self, kind: DatastoreType) -> BindingAwareDatastore {
        BindingAwareDatastore::new(Datastore::new(kind, self.schema.clone()), self.codec)
    }
}

/// Process-wide registry of the default model cache.
pub static MODEL_REGISTRY: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::new);

/// Loads each model once and hands out shared contexts.
///
/// Lookups take a read lock; loading is serialized by a single build lock so
/// a model directory is scanned at most once. Entries live as long as the
/// registry.
#[derive(Default)]
pub struct ModelRegistry {
    schemas: RwLock<HashMap<PathBuf, Arc<SchemaContext>>>,
    bindings: RwLock<HashMap<PathBuf, Arc<BindingContext>>>,
    build: Mutex<()>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_schema_context(&self, model: &Model) -> Result<Arc<SchemaContext>, RegistryError> {
        if let Some(schema) = read_map(&self.schemas).get(model.dir()) {
            return Ok(schema.clone());
        }
        let _build = self.build.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.schema_while_building(model)
    }

    pub fn get_binding_context(&self, model: &Model) -> Result<Arc<BindingContext>, RegistryError> {
        if let Some(binding) = read_map(&self.bindings).get(model.dir()) {
            return Ok(binding.clone());
        }
        let _build = self.build.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(binding) = read_map(&self.bindings).get(model.dir()) {
            return Ok(binding.clone());
        }
        let binding = Arc::new(BindingContext {
            model: model.clone(),
            schema: self.schema_while_building(model)?,
            codec: BindingCodec,
        });
        write_map(&self.bindings).insert(model.dir().to_path_buf(), binding.clone());
        Ok(binding)
    }

    /// Number of models loaded so far.
    pub fn len(&self) -> usize {
        read_map(&self.schemas).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Caller holds the build lock.
    fn schema_while_building(&self, model: &Model) -> Result<Arc<SchemaContext>, RegistryError> {
        if let Some(schema) = read_map(&self.schemas).get(model.dir()) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(SchemaContext::load(model)?);
        write_map(&self.schemas).insert(model.dir().to_path_buf(), schema.clone());
        debug!("model {} cached from {}", model, model.dir().display());
        Ok(schema)
    }
}

fn read_map<V>(map: &RwLock<HashMap<PathBuf, V>>) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, V>> {
    map.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_map<V>(map: &RwLock<HashMap<PathBuf, V>>) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, V>> {
    map.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
