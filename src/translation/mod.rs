//! Translation between device CLI text and the structured tree.
//!
//! Plugins register [`Reader`]s and [`ListReader`]s that build the
//! operational tree, and [`Writer`]s that push configuration diffs back to
//! the device. Paths travel as [`Path`] values and data as
//! `serde_json::Value`, so a reader or writer backed by a remote process is
//! interchangeable with an in-process one.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::datastore::{BindingCodec, DatastoreDiff, DiffKind, DiffPath, Path};
use crate::device::DeviceAccess;
use crate::error::TranslationError;

pub use commit::{CommitFailure, CommitReport, ConfigCommitter};
pub use readers::ReaderRegistry;
pub use writers::WriterRegistry;

mod commit;
mod readers;
mod writers;

/// Produces the value of one node instance.
#[async_trait]
pub trait Reader: Send + Sync {
    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Value>;
}

/// Lists the key objects of every entry of a list, e.g. `[{"name": "0/1"}]`.
#[async_trait]
pub trait ListReader: Send + Sync {
    async fn read_keys(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Vec<Value>>;
}

/// Applies one node's change to the device.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn create(&self, path: &Path, after: &Value, device: &DeviceAccess) -> anyhow::Result<()>;

    async fn update(
        &self,
        path: &Path,
        before: &Value,
        after: &Value,
        device: &DeviceAccess,
    ) -> anyhow::Result<()>;

    async fn remove(&self, path: &Path, before: &Value, device: &DeviceAccess) -> anyhow::Result<()>;
}

/// A [`Reader`] producing a typed binding.
#[async_trait]
pub trait BindingReader: Send + Sync {
    type Output: Serialize + Send;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Self::Output>;
}

/// A [`Writer`] consuming typed bindings.
#[async_trait]
pub trait BindingWriter: Send + Sync {
    type Input: DeserializeOwned + Send + Sync;

    async fn create(&self, path: &Path, after: &Self::Input, device: &DeviceAccess) -> anyhow::Result<()>;

    async fn update(
        &self,
        path: &Path,
        before: &Self::Input,
        after: &Self::Input,
        device: &DeviceAccess,
    ) -> anyhow::Result<()>;

    async fn remove(&self, path: &Path, before: &Self::Input, device: &DeviceAccess) -> anyhow::Result<()>;
}

/// Adapts a [`BindingReader`] or [`BindingWriter`] to the untyped traits.
pub struct Typed<T> {
    inner: T,
    codec: BindingCodec,
}

impl<T> Typed<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            codec: BindingCodec,
        }
    }

    fn decode<I: DeserializeOwned>(&self, path: &Path, value: &Value) -> anyhow::Result<I> {
        Ok(self.codec.decode(path, value.clone())?)
    }
}

#[async_trait]
impl<R: BindingReader> Reader for Typed<R> {
    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Value> {
        let typed = self.inner.read(path, device).await?;
        Ok(self.codec.encode(&typed)?)
    }
}

#[async_trait]
impl<W: BindingWriter> Writer for Typed<W> {
    async fn create(&self, path: &Path, after: &Value, device: &DeviceAccess) -> anyhow::Result<()> {
        let after = self.decode(path, after)?;
        self.inner.create(path, &after, device).await
    }

    async fn update(
        &self,
        path: &Path,
        before: &Value,
        after: &Value,
        device: &DeviceAccess,
    ) -> anyhow::Result<()> {
        let before = self.decode(path, before)?;
        let after = self.decode(path, after)?;
        self.inner.update(path, &before, &after, device).await
    }

    async fn remove(&self, path: &Path, before: &Value, device: &DeviceAccess) -> anyhow::Result<()> {
        let before = self.decode(path, before)?;
        self.inner.remove(path, &before, device).await
    }
}
