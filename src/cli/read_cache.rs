use super::*;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ReadCacheConfig;

/// Command output cache shared between a [`ReadCachingCli`] and its owner.
///
/// Every invalidation bumps a generation counter. A read takes the
/// generation before it reaches the device and only stores its output if
/// no invalidation happened in between.
#[derive(Clone)]
pub struct ReadCache {
    cache: Cache<String, String>,
    generation: Arc<AtomicU64>,
}

impl ReadCache {
    pub fn new(config: &ReadCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            cache,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, command: &str) -> Option<String> {
        self.cache.get(command).await
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores `output` unless the cache was invalidated after `generation`
    /// was taken. Returns whether the entry was kept.
    pub async fn insert_if_current(&self, generation: u64, command: String, output: String) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.cache.insert(command.clone(), output).await;
        if self.generation() != generation {
            // an invalidation ran between the check and the insert
            self.cache.invalidate(&command).await;
            return false;
        }
        true
    }

    /// Drops every entry. Reads issued after this call never see older data.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

/// Answers repeated reads from a [`ReadCache`]; any write clears it.
pub struct ReadCachingCli<C> {
    inner: C,
    cache: ReadCache,
    channel_id: String,
}

impl<C: Cli> ReadCachingCli<C> {
    pub fn new(inner: C, cache: ReadCache, channel_id: impl Into<String>) -> Self {
        Self {
            inner,
            cache,
            channel_id: channel_id.into(),
        }
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }
}

#[async_trait]
impl<C: Cli> Cli for ReadCachingCli<C> {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        if let Some(output) = self.cache.get(command.raw()).await {
            debug!("[{}] read cache hit '{}'", self.channel_id, command);
            return Ok(output);
        }
        debug!("[{}] read cache miss '{}'", self.channel_id, command);
        let generation = self.cache.generation();
        let output = self.inner.execute_read(command).await?;
        if !self
            .cache
            .insert_if_current(generation, command.raw().to_string(), output.clone())
            .await
        {
            debug!(
                "[{}] '{}' raced a write, not cached",
                self.channel_id, command
            );
        }
        Ok(output)
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        self.cache.invalidate_all();
        let result = self.inner.execute_write(command).await;
        self.cache.invalidate_all();
        result
    }

    async fn destroy(&self) -> Result<(), CliError> {
        self.cache.invalidate_all();
        self.inner.destroy().await
    }
}
