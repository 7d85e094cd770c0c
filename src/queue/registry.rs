//! Queue registry: name validation, authorization and the instance cache.
//!
//! Instances are created lazily on first access and cached by normalized
//! name. Construction is single-flight: concurrent misses for the same name
//! share one in-progress construction and all observe the same instance. A
//! failed construction is reported to every waiter of that attempt and leaves
//! nothing cached, so the next access retries.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::auth::{AllowAll, Authorizer};
use crate::metrics::RegistryMetrics;

use super::backend::{StorageError, StorageProvider};
use super::error::QueueError;
use super::instance::QueueInstance;
use super::message::QueueMessage;
use super::pending::PendingScanSet;

type Construction = Shared<BoxFuture<'static, Result<Arc<QueueInstance>, Arc<StorageError>>>>;

/// Trim and lowercase a queue name.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether the normalized name is non-empty ASCII lowercase alphanumeric.
pub fn is_valid_queue_name(name: &str) -> bool {
    let normalized = normalize(name);
    !normalized.is_empty()
        && normalized
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

pub struct QueueRegistry {
    provider: Arc<dyn StorageProvider>,
    authorizer: Arc<dyn Authorizer>,
    instances: Arc<DashMap<String, Arc<QueueInstance>>>,
    loading: Arc<DashMap<String, Construction>>,
    pending: Arc<PendingScanSet>,
}

impl QueueRegistry {
    /// Create a registry that permits every request.
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self::with_authorizer(provider, Arc::new(AllowAll))
    }

    pub fn with_authorizer(
        provider: Arc<dyn StorageProvider>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            provider,
            authorizer,
            instances: Arc::new(DashMap::new()),
            loading: Arc::new(DashMap::new()),
            pending: Arc::new(PendingScanSet::new()),
        }
    }

    /// Names awaiting an orphan scan. Shared with the reconciler.
    pub fn pending(&self) -> &Arc<PendingScanSet> {
        &self.pending
    }

    pub fn backend_type(&self) -> &'static str {
        self.provider.backend_type()
    }

    /// Number of cached instances.
    pub fn cached_count(&self) -> usize {
        self.instances.len()
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.instances.contains_key(&normalize(name))
    }

    pub async fn authorize(&self, secret: &str, name: &str) -> bool {
        self.authorizer.authorize(secret, &normalize(name)).await
    }

    /// Whether the queue's storage exists. Invalid names never exist.
    pub async fn queue_exists(&self, name: &str) -> Result<bool, QueueError> {
        if !is_valid_queue_name(name) {
            return Ok(false);
        }
        Ok(self.provider.queue_exists(&normalize(name)).await?)
    }

    /// Provision storage and record metadata. Idempotent.
    pub async fn init_queue(&self, name: &str) -> Result<bool, QueueError> {
        if !is_valid_queue_name(name) {
            return Err(QueueError::InvalidName(name.to_string()));
        }

        let normalized = normalize(name);
        let created = self.provider.init_queue(&normalized).await?;
        tracing::info!(queue = %normalized, backend = self.provider.backend_type(), "Queue initialized");
        Ok(created)
    }

    pub async fn all_queue_names(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.provider.all_queue_names().await?)
    }

    /// Cached instance for the queue, created on first access.
    ///
    /// `None` if the name is invalid or the queue does not exist.
    pub async fn get_instance(&self, name: &str) -> Result<Option<Arc<QueueInstance>>, QueueError> {
        if !is_valid_queue_name(name) {
            return Ok(None);
        }
        let normalized = normalize(name);

        if let Some(instance) = self.cached(&normalized) {
            return Ok(Some(instance));
        }

        if !self.provider.queue_exists(&normalized).await? {
            return Ok(None);
        }

        self.get_or_construct(&normalized).await.map(Some)
    }

    fn cached(&self, normalized: &str) -> Option<Arc<QueueInstance>> {
        self.instances.get(normalized).map(|entry| entry.value().clone())
    }

    async fn get_or_construct(&self, normalized: &str) -> Result<Arc<QueueInstance>, QueueError> {
        let construction = match self.loading.entry(normalized.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // A construction may have finished between the cache miss and now
                if let Some(instance) = self.cached(normalized) {
                    return Ok(instance);
                }
                let construction = self.construct(normalized.to_string());
                entry.insert(construction.clone());
                construction
            }
        };

        construction.await.map_err(|source| QueueError::Construction {
            queue: normalized.to_string(),
            source,
        })
    }

    /// Build the shared construction future for `name`.
    ///
    /// The future publishes the instance before clearing its loading entry,
    /// so a caller always finds one or the other.
    fn construct(&self, name: String) -> Construction {
        let provider = self.provider.clone();
        let instances = self.instances.clone();
        let loading = self.loading.clone();

        async move {
            let outcome = match provider.open(&name).await {
                Ok(storage) => {
                    let instance = Arc::new(QueueInstance::new(name.clone(), storage));
                    instances.insert(name.clone(), instance.clone());
                    RegistryMetrics::instance_opened();
                    tracing::debug!(queue = %name, backend = provider.backend_type(), "Queue instance opened");
                    Ok(instance)
                }
                Err(e) => {
                    RegistryMetrics::open_failed();
                    tracing::error!(queue = %name, error = %e, "Failed to open queue instance");
                    Err(Arc::new(e))
                }
            };
            loading.remove(&name);
            outcome
        }
        .boxed()
        .shared()
    }

    /// Evict the cached instance and shut it down.
    ///
    /// Returns `true` for the caller that performed the eviction. Concurrent
    /// callers see `false` and the instance is shut down once.
    pub async fn invalidate(&self, name: &str) -> bool {
        let normalized = normalize(name);
        let Some((_, instance)) = self.instances.remove(&normalized) else {
            return false;
        };

        if instance.shutdown().await {
            RegistryMetrics::instance_closed();
        }
        tracing::debug!(queue = %normalized, "Queue instance evicted");
        true
    }

    /// Evict and shut down every cached instance.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        let count = names.len();

        for name in names {
            self.invalidate(&name).await;
        }

        tracing::info!(instances = count, "Queue registry shut down");
    }

    /// Run `op` against the queue's instance.
    ///
    /// `Ok(None)` when the queue does not exist. An instance closed by a
    /// concurrent eviction is re-resolved once.
    async fn with_instance<T, F, Fut>(&self, name: &str, op: F) -> Result<Option<T>, QueueError>
    where
        F: Fn(Arc<QueueInstance>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut retried = false;
        loop {
            let Some(instance) = self.get_instance(name).await? else {
                return Ok(None);
            };

            match op(instance).await {
                Ok(value) => return Ok(Some(value)),
                Err(StorageError::Closed) if !retried => {
                    tracing::debug!(queue = %normalize(name), "Instance closed during operation, re-resolving");
                    retried = true;
                }
                Err(e) => return Err(QueueError::Storage(e)),
            }
        }
    }

    /// Enqueue `content`. `false` if the queue does not exist.
    pub async fn queue(&self, name: &str, content: &[u8]) -> Result<bool, QueueError> {
        let result = self
            .with_instance(name, |instance| async move {
                instance.enqueue(&QueueMessage::new(content)).await
            })
            .await?;
        Ok(result.unwrap_or(false))
    }

    /// Take the oldest pending message and schedule the queue for an orphan scan.
    pub async fn take(&self, name: &str) -> Result<Option<QueueMessage>, QueueError> {
        let taken = self
            .with_instance(name, |instance| async move { instance.take().await })
            .await?
            .flatten();

        if taken.is_some() {
            self.pending.insert(normalize(name));
        }
        Ok(taken)
    }

    pub async fn finish(&self, name: &str, msg: &QueueMessage) -> Result<bool, QueueError> {
        let result = self
            .with_instance(name, |instance| async move { instance.finish(msg).await })
            .await?;
        Ok(result.unwrap_or(false))
    }

    pub async fn requeue(&self, name: &str, msg: &QueueMessage) -> Result<bool, QueueError> {
        let result = self
            .with_instance(name, |instance| async move { instance.requeue(msg).await })
            .await?;
        Ok(result.unwrap_or(false))
    }

    pub async fn requeue_silent(&self, name: &str, msg: &QueueMessage) -> Result<bool, QueueError> {
        let result = self
            .with_instance(name, |instance| async move { instance.requeue_silent(msg).await })
            .await?;
        Ok(result.unwrap_or(false))
    }

    /// Pending message count, `-1` if the queue does not exist.
    pub async fn queue_size(&self, name: &str) -> Result<i64, QueueError> {
        let result = self
            .with_instance(name, |instance| async move { instance.queue_size().await })
            .await?;
        Ok(result.unwrap_or(-1))
    }

    /// In-flight message count, `-1` if the queue does not exist.
    pub async fn ephemeral_size(&self, name: &str) -> Result<i64, QueueError> {
        let result = self
            .with_instance(name, |instance| async move { instance.ephemeral_size().await })
            .await?;
        Ok(result.unwrap_or(-1))
    }
}
