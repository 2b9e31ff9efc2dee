use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::store::{SharedStore, StoreError, TTL_MISSING};

use super::age::format_age;
use super::envelope::{CacheEnvelope, EnvelopeMetadata, MetadataOnly, RawEnvelope};
use super::keys::{all_versions_pattern, version_for, versioned_key};
use super::registry::CacheNamespace;

const METRIC_HIT_TOTAL: &str = "sitecache_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "sitecache_cache_miss_total";
const METRIC_HEAL_TOTAL: &str = "sitecache_cache_heal_total";
const METRIC_WRITE_TOTAL: &str = "sitecache_cache_write_total";

/// Predicate applied to a payload after it has been decoded into `T`.
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Why a read produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissReason {
    Absent,
    Unparseable,
    VersionMismatch,
    InvalidShape,
    ValidationFailed,
    StoreError,
}

impl MissReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Unparseable => "unparseable",
            Self::VersionMismatch => "version_mismatch",
            Self::InvalidShape => "invalid_shape",
            Self::ValidationFailed => "validation_failed",
            Self::StoreError => "store_error",
        }
    }

    /// Whether the stored entry is bad and must be removed.
    fn heals(self) -> bool {
        matches!(
            self,
            Self::Unparseable | Self::VersionMismatch | Self::InvalidShape | Self::ValidationFailed
        )
    }
}

/// Construction parameters for a [`VersionedCache`].
pub struct CacheOptions<T> {
    pub namespace: String,
    pub version: u32,
    pub ttl_seconds: u64,
    pub validate: Option<Validator<T>>,
    pub description: Option<String>,
}

impl<T> CacheOptions<T> {
    pub fn new(namespace: impl Into<String>, version: u32, ttl_seconds: u64) -> Self {
        Self {
            namespace: namespace.into(),
            version,
            ttl_seconds,
            validate: None,
            description: None,
        }
    }

    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl<T> Clone for CacheOptions<T> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            version: self.version,
            ttl_seconds: self.ttl_seconds,
            validate: self.validate.clone(),
            description: self.description.clone(),
        }
    }
}

impl<T> fmt::Debug for CacheOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("validate", &self.validate.is_some())
            .field("description", &self.description)
            .finish()
    }
}

/// Read-only facts about one cached entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub exists: bool,
    pub version: Option<u32>,
    pub age: Option<String>,
    /// Remaining store TTL in seconds.
    pub ttl: Option<i64>,
}

impl EntryStats {
    fn missing() -> Self {
        Self {
            exists: false,
            version: None,
            age: None,
            ttl: None,
        }
    }
}

/// A namespace of JSON-encoded values that heals itself against schema drift.
///
/// Entries live under `{namespace}:v{version}:{key}` wrapped in a
/// [`CacheEnvelope`]. A read that finds an entry written under another
/// version, one that no longer decodes into `T`, or one the validator rejects
/// deletes it and reports a miss. No operation surfaces store failures: reads
/// miss and writes return `false`.
pub struct VersionedCache<T> {
    options: CacheOptions<T>,
    store: SharedStore,
}

impl<T> Clone for VersionedCache<T> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<T> VersionedCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(options: CacheOptions<T>, store: SharedStore) -> Self {
        Self { options, store }
    }

    /// Cache configured from the registry entry for `namespace`.
    pub fn for_namespace(namespace: CacheNamespace, store: SharedStore) -> Self {
        let options = CacheOptions::new(
            namespace.name(),
            namespace.version(),
            namespace.default_ttl_seconds(),
        )
        .with_description(namespace.description());
        Self::new(options, store)
    }

    /// Same cache with a payload validator attached.
    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.options.validate = Some(Arc::new(validate));
        self
    }

    pub fn options(&self) -> &CacheOptions<T> {
        &self.options
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    pub fn version(&self) -> u32 {
        self.options.version
    }

    /// Physical store key for `key` under the current version.
    pub fn versioned_key(&self, key: &str) -> String {
        versioned_key(&self.options.namespace, self.options.version, key)
    }

    /// Read `key`. Any problem with the stored entry is a miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        let full_key = self.versioned_key(key);
        let started = Instant::now();

        let raw = match self.store.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.miss(key, &full_key, MissReason::Absent).await,
            Err(err) => {
                self.log_store_failure("get", key, started, &err);
                return self.miss(key, &full_key, MissReason::StoreError).await;
            }
        };

        let envelope: RawEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(
                    namespace = %self.options.namespace,
                    key,
                    error = %err,
                    "cached envelope does not parse"
                );
                return self.miss(key, &full_key, MissReason::Unparseable).await;
            }
        };

        if envelope.metadata.version != self.options.version {
            debug!(
                namespace = %self.options.namespace,
                key,
                stored_version = envelope.metadata.version,
                current_version = self.options.version,
                "cached entry written under another version"
            );
            return self.miss(key, &full_key, MissReason::VersionMismatch).await;
        }

        let data: T = match serde_json::from_value(envelope.data) {
            Ok(data) => data,
            Err(err) => {
                debug!(
                    namespace = %self.options.namespace,
                    key,
                    error = %err,
                    "cached payload does not decode"
                );
                return self.miss(key, &full_key, MissReason::InvalidShape).await;
            }
        };

        if let Some(validate) = &self.options.validate {
            if !validate(&data) {
                return self.miss(key, &full_key, MissReason::ValidationFailed).await;
            }
        }

        counter!(METRIC_HIT_TOTAL, "namespace" => self.options.namespace.clone()).increment(1);
        debug!(namespace = %self.options.namespace, key, "cache hit");
        Some(data)
    }

    /// Write `data` under `key`, expiring after `ttl_override` seconds or the
    /// configured TTL. Returns whether the write reached the store.
    pub async fn set(&self, key: &str, data: &T, ttl_override: Option<u64>) -> bool {
        let full_key = self.versioned_key(key);
        let ttl_seconds = ttl_override.unwrap_or(self.options.ttl_seconds);
        let started = Instant::now();

        let cached_at = OffsetDateTime::now_utc();
        let Some(expires_at) = i64::try_from(ttl_seconds)
            .ok()
            .and_then(|seconds| cached_at.checked_add(time::Duration::seconds(seconds)))
        else {
            warn!(
                namespace = %self.options.namespace,
                key,
                ttl_seconds,
                "cache ttl is out of range"
            );
            self.record_write("error");
            return false;
        };
        let envelope = CacheEnvelope {
            metadata: EnvelopeMetadata {
                version: self.options.version,
                namespace: self.options.namespace.clone(),
                cached_at,
                expires_at,
            },
            data,
        };

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    namespace = %self.options.namespace,
                    key,
                    error = %err,
                    "cache payload failed to serialize"
                );
                self.record_write("error");
                return false;
            }
        };

        match self
            .store
            .set_with_expiry(&full_key, ttl_seconds, &payload)
            .await
        {
            Ok(()) => {
                debug!(namespace = %self.options.namespace, key, ttl_seconds, "cache entry written");
                self.record_write("ok");
                true
            }
            Err(err) => {
                self.log_store_failure("set", key, started, &err);
                self.record_write("error");
                false
            }
        }
    }

    /// Remove the current-version entry for `key`. Returns whether the delete
    /// command succeeded, whether or not the entry existed.
    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.versioned_key(key);
        let started = Instant::now();
        match self.store.delete(&[full_key]).await {
            Ok(removed) => {
                debug!(namespace = %self.options.namespace, key, removed, "cache entry deleted");
                true
            }
            Err(err) => {
                self.log_store_failure("delete", key, started, &err);
                false
            }
        }
    }

    /// Remove `key` under every version, returning how many entries went away.
    pub async fn delete_all_versions(&self, key: &str) -> u64 {
        let pattern = all_versions_pattern(&self.options.namespace, key);
        let started = Instant::now();

        let candidates = match self.store.keys_matching(&pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                self.log_store_failure("keys_matching", key, started, &err);
                return 0;
            }
        };

        let matching: Vec<String> = candidates
            .into_iter()
            .filter(|candidate| version_for(candidate, &self.options.namespace, key).is_some())
            .collect();
        if matching.is_empty() {
            return 0;
        }

        match self.store.delete(&matching).await {
            Ok(removed) => {
                debug!(
                    namespace = %self.options.namespace,
                    key,
                    removed,
                    "deleted every version of cache entry"
                );
                removed
            }
            Err(err) => {
                self.log_store_failure("delete", key, started, &err);
                0
            }
        }
    }

    /// Inspect the current-version entry for `key` without modifying it.
    pub async fn get_stats(&self, key: &str) -> EntryStats {
        let full_key = self.versioned_key(key);
        let started = Instant::now();

        let raw = match self.store.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return EntryStats::missing(),
            Err(err) => {
                self.log_store_failure("get", key, started, &err);
                return EntryStats::missing();
            }
        };

        let metadata = serde_json::from_str::<MetadataOnly>(&raw)
            .ok()
            .map(|envelope| envelope.metadata);
        let ttl = match self.store.ttl(&full_key).await {
            Ok(TTL_MISSING) => None,
            Ok(seconds) => Some(seconds),
            Err(err) => {
                self.log_store_failure("ttl", key, started, &err);
                None
            }
        };

        EntryStats {
            exists: true,
            version: metadata.as_ref().map(|metadata| metadata.version),
            age: metadata.map(|metadata| format_age(metadata.cached_at, OffsetDateTime::now_utc())),
            ttl,
        }
    }

    /// Return the cached value for `key`, or build, store and return it.
    ///
    /// Errors from `build` propagate; a failed write does not.
    pub async fn get_or_insert_with<F, Fut, E>(&self, key: &str, build: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }
        let fresh = build().await?;
        self.set(key, &fresh, None).await;
        Ok(fresh)
    }

    async fn miss(&self, key: &str, full_key: &str, reason: MissReason) -> Option<T> {
        counter!(
            METRIC_MISS_TOTAL,
            "namespace" => self.options.namespace.clone(),
            "reason" => reason.as_str()
        )
        .increment(1);

        if !reason.heals() {
            debug!(namespace = %self.options.namespace, key, reason = reason.as_str(), "cache miss");
            return None;
        }

        counter!(
            METRIC_HEAL_TOTAL,
            "namespace" => self.options.namespace.clone(),
            "reason" => reason.as_str()
        )
        .increment(1);
        warn!(
            namespace = %self.options.namespace,
            key,
            reason = reason.as_str(),
            "discarding stale cache entry"
        );
        if let Err(err) = self.store.delete(&[full_key.to_string()]).await {
            warn!(
                namespace = %self.options.namespace,
                key,
                error = %err,
                "failed to delete stale cache entry"
            );
        }
        None
    }

    fn record_write(&self, result: &'static str) {
        counter!(
            METRIC_WRITE_TOTAL,
            "namespace" => self.options.namespace.clone(),
            "result" => result
        )
        .increment(1);
    }

    fn log_store_failure(&self, operation: &str, key: &str, started: Instant, err: &StoreError) {
        warn!(
            namespace = %self.options.namespace,
            key,
            operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            error = %err,
            "cache store operation failed"
        );
    }
}
