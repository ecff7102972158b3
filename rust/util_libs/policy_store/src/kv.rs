use async_nats::jetstream::kv::Store;
use async_trait::async_trait;
use futures::StreamExt;
use policy_engine::model::{self, Binding, Policy, GLOBAL_ACCOUNT};
use policy_engine::store::{PolicyStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_retry::strategy::ExponentialBackoff;

const POLICY_SEGMENT: &str = ".policy.";
const BINDING_SEGMENT: &str = ".binding.";

/// Errors from the administrative write surface. Reads go through
/// [`StoreError`] like every other store.
#[derive(Error, Debug)]
pub enum KvWriteError {
    #[error("record failed validation: {0}")]
    Validation(String),

    #[error("bindings cannot be global")]
    GlobalBinding,

    #[error("record '{key}' already exists")]
    AlreadyExists { key: String },

    #[error("revision mismatch writing '{key}': {reason}")]
    RevisionMismatch { key: String, reason: String },

    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },
}

#[derive(Debug, Clone)]
enum CachedValue {
    Policy(Policy),
    Binding(Binding),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

type Cache = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// Read-through cache over a NATS KV bucket holding policies and
/// bindings.
///
/// Reads answer from the cache when fresh; misses fetch from the bucket,
/// validate and fill. A background watcher subscribes to all bucket
/// changes and invalidates the exact key on every put, delete or purge,
/// so a cache entry is stale for at most the configured TTL even if the
/// watcher is down. The watcher reconnects with exponential backoff and
/// never clears the cache while doing so.
pub struct KvPolicyStore {
    bucket: Store,
    cache: Cache,
    cache_ttl: Duration,
    shutdown_tx: watch::Sender<bool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl KvPolicyStore {
    /// Wrap `bucket` and start the invalidation watcher.
    pub fn new(bucket: Store, cache_ttl: Duration) -> Self {
        let cache: Cache = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = spawn_watcher(bucket.clone(), cache.clone(), shutdown_rx);

        Self {
            bucket,
            cache,
            cache_ttl,
            shutdown_tx,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    /// Stop the watcher task. In-flight reads complete normally; the
    /// cache is left intact.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.watcher.lock().await.take() {
            if let Err(e) = handle.await {
                log::warn!("Policy bucket watcher did not stop cleanly: {e}");
            }
        }
    }

    async fn cache_get(&self, key: &str) -> Option<CachedValue> {
        let cache = self.cache.read().await;
        let entry = cache.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn cache_put(&self, key: String, value: CachedValue) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.cache_ttl,
        };
        // The write lock is held only for the single-entry insert.
        let mut cache = self.cache.write().await;
        cache.insert(key, entry);
    }

    async fn cache_invalidate(&self, key: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key);
    }

    async fn fetch_policy(&self, account: &str, id: &str, key: &str) -> Result<Policy, StoreError> {
        let bytes = self
            .bucket
            .get(key)
            .await
            .map_err(|e| StoreError::fetch(key, e.to_string()))?
            .ok_or_else(|| StoreError::PolicyNotFound {
                account: account.to_string(),
                id: id.to_string(),
            })?;

        let policy: Policy = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::fetch(key, format!("decode failed: {e}")))?;
        policy
            .validate()
            .map_err(|e| StoreError::fetch(key, format!("validation failed: {e}")))?;
        if policy.account != account {
            return Err(StoreError::fetch(
                key,
                format!(
                    "record account '{}' does not match key prefix '{}'",
                    policy.account,
                    model::account_prefix(account)
                ),
            ));
        }
        Ok(policy)
    }

    async fn fetch_binding(
        &self,
        account: &str,
        role: &str,
        key: &str,
    ) -> Result<Binding, StoreError> {
        let bytes = self
            .bucket
            .get(key)
            .await
            .map_err(|e| StoreError::fetch(key, e.to_string()))?
            .ok_or_else(|| StoreError::RoleNotFound {
                account: account.to_string(),
                role: role.to_string(),
            })?;

        let binding: Binding = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::fetch(key, format!("decode failed: {e}")))?;
        binding
            .validate()
            .map_err(|e| StoreError::fetch(key, format!("validation failed: {e}")))?;
        Ok(binding)
    }

    // ==================== Admin writes ====================
    // Used by operator tooling and the live-update tests. Creates are
    // exclusive; updates compare-and-set on the KV revision.

    pub async fn create_policy(&self, policy: &Policy) -> Result<u64, KvWriteError> {
        let key = policy_key(&policy.account, &policy.id);
        policy
            .validate()
            .map_err(|e| KvWriteError::Validation(e.to_string()))?;
        let payload = encode(policy, &key)?;
        let revision = self
            .bucket
            .create(&key, payload)
            .await
            .map_err(|e| map_create_error(&key, e))?;
        self.cache_invalidate(&key).await;
        Ok(revision)
    }

    pub async fn update_policy(&self, policy: &Policy, revision: u64) -> Result<u64, KvWriteError> {
        let key = policy_key(&policy.account, &policy.id);
        policy
            .validate()
            .map_err(|e| KvWriteError::Validation(e.to_string()))?;
        let payload = encode(policy, &key)?;
        let revision = self
            .bucket
            .update(&key, payload, revision)
            .await
            .map_err(|e| KvWriteError::RevisionMismatch {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        self.cache_invalidate(&key).await;
        Ok(revision)
    }

    pub async fn delete_policy(&self, account: &str, id: &str) -> Result<(), KvWriteError> {
        let key = policy_key(account, id);
        self.bucket
            .delete(&key)
            .await
            .map_err(|e| KvWriteError::Write {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        self.cache_invalidate(&key).await;
        Ok(())
    }

    pub async fn create_binding(&self, binding: &Binding) -> Result<u64, KvWriteError> {
        let key = try_binding_key(&binding.account, &binding.role)?;
        binding
            .validate()
            .map_err(|e| KvWriteError::Validation(e.to_string()))?;
        let payload = encode(binding, &key)?;
        let revision = self
            .bucket
            .create(&key, payload)
            .await
            .map_err(|e| map_create_error(&key, e))?;
        self.cache_invalidate(&key).await;
        Ok(revision)
    }

    pub async fn update_binding(
        &self,
        binding: &Binding,
        revision: u64,
    ) -> Result<u64, KvWriteError> {
        let key = try_binding_key(&binding.account, &binding.role)?;
        binding
            .validate()
            .map_err(|e| KvWriteError::Validation(e.to_string()))?;
        let payload = encode(binding, &key)?;
        let revision = self
            .bucket
            .update(&key, payload, revision)
            .await
            .map_err(|e| KvWriteError::RevisionMismatch {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        self.cache_invalidate(&key).await;
        Ok(revision)
    }

    pub async fn delete_binding(&self, account: &str, role: &str) -> Result<(), KvWriteError> {
        let key = try_binding_key(account, role)?;
        self.bucket
            .delete(&key)
            .await
            .map_err(|e| KvWriteError::Write {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        self.cache_invalidate(&key).await;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for KvPolicyStore {
    async fn get_policy(&self, account: &str, id: &str) -> Result<Policy, StoreError> {
        let key = policy_key(account, id);
        if let Some(CachedValue::Policy(policy)) = self.cache_get(&key).await {
            return Ok(policy);
        }

        let policy = self.fetch_policy(account, id, &key).await?;
        self.cache_put(key, CachedValue::Policy(policy.clone()))
            .await;
        Ok(policy)
    }

    async fn get_binding(&self, account: &str, role: &str) -> Result<Binding, StoreError> {
        let key = binding_key(account, role)
            .ok_or_else(|| StoreError::invalid_key(account, "bindings cannot be global"))?;
        if let Some(CachedValue::Binding(binding)) = self.cache_get(&key).await {
            return Ok(binding);
        }

        let binding = self.fetch_binding(account, role, &key).await?;
        self.cache_put(key, CachedValue::Binding(binding.clone()))
            .await;
        Ok(binding)
    }

    async fn list_policies(&self, account: &str) -> Result<Vec<Policy>, StoreError> {
        let mut keys = self
            .bucket
            .keys()
            .await
            .map_err(|e| StoreError::fetch("<keys>", e.to_string()))?
            .boxed();

        let mut wanted = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| StoreError::fetch("<keys>", e.to_string()))?;
            let Some(ParsedKey::Policy { prefix, id }) = ParsedKey::parse(&key) else {
                continue;
            };
            let key_account = model::account_from_prefix(prefix);
            if key_account == account || key_account == GLOBAL_ACCOUNT {
                wanted.push((key_account.to_string(), id.to_string()));
            }
        }

        let mut policies = Vec::with_capacity(wanted.len());
        for (key_account, id) in wanted {
            match self.get_policy(&key_account, &id).await {
                Ok(policy) => policies.push(policy),
                // Deleted while listing; skip.
                Err(StoreError::PolicyNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(policies)
    }
}

fn encode<T: serde::Serialize>(value: &T, key: &str) -> Result<bytes::Bytes, KvWriteError> {
    serde_json::to_vec(value)
        .map(Into::into)
        .map_err(|e| KvWriteError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn map_create_error(key: &str, e: async_nats::error::Error<async_nats::jetstream::kv::CreateErrorKind>) -> KvWriteError {
    match e.kind() {
        async_nats::jetstream::kv::CreateErrorKind::AlreadyExists => KvWriteError::AlreadyExists {
            key: key.to_string(),
        },
        _ => KvWriteError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        },
    }
}

pub(crate) fn policy_key(account: &str, id: &str) -> String {
    format!("{}{POLICY_SEGMENT}{id}", model::account_prefix(account))
}

pub(crate) fn binding_key(account: &str, role: &str) -> Option<String> {
    if account == GLOBAL_ACCOUNT {
        return None;
    }
    Some(format!("{account}{BINDING_SEGMENT}{role}"))
}

fn try_binding_key(account: &str, role: &str) -> Result<String, KvWriteError> {
    binding_key(account, role).ok_or(KvWriteError::GlobalBinding)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParsedKey<'a> {
    Policy { prefix: &'a str, id: &'a str },
    Binding { prefix: &'a str, role: &'a str },
}

impl<'a> ParsedKey<'a> {
    pub(crate) fn parse(key: &'a str) -> Option<Self> {
        if let Some((prefix, id)) = key.split_once(POLICY_SEGMENT) {
            if !prefix.is_empty() && !id.is_empty() {
                return Some(ParsedKey::Policy { prefix, id });
            }
        }
        if let Some((prefix, role)) = key.split_once(BINDING_SEGMENT) {
            if !prefix.is_empty() && !role.is_empty() {
                return Some(ParsedKey::Binding { prefix, role });
            }
        }
        None
    }
}

/// One reconnect schedule: 1s doubling to a 30s cap.
fn backoff_strategy() -> ExponentialBackoff {
    ExponentialBackoff::from_millis(2)
        .factor(500)
        .max_delay(Duration::from_secs(30))
}

/// The single long-running task in the store: watch every key in the
/// bucket and drop the matching cache entry on each change. The cache
/// lock is taken per event and never held across an await on the watch
/// stream.
fn spawn_watcher(bucket: Store, cache: Cache, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = backoff_strategy();
        loop {
            let watch = tokio::select! {
                _ = shutdown_rx.changed() => return,
                watch = bucket.watch_all() => watch,
            };

            match watch {
                Ok(mut entries) => {
                    log::info!("Policy bucket watcher connected");
                    backoff = backoff_strategy();
                    loop {
                        let item = tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            item = entries.next() => item,
                        };
                        match item {
                            Some(Ok(entry)) => {
                                log::debug!(
                                    "Policy bucket change ({:?}) on '{}', invalidating",
                                    entry.operation,
                                    entry.key
                                );
                                cache.write().await.remove(&entry.key);
                            }
                            Some(Err(e)) => {
                                log::warn!("Policy bucket watcher error: {e}");
                                break;
                            }
                            None => {
                                log::warn!("Policy bucket watch stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => log::warn!("Failed to watch policy bucket: {e}"),
            }

            let delay = backoff.next().expect("backoff schedule is unbounded");
            log::debug!("Retrying policy bucket watch in {delay:?}");
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    })
}
