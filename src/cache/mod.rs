//! Versioned, self-healing cache over a remote key-value store.
//!
//! Values are stored as JSON envelopes under `{namespace}:v{version}:{key}`.
//! The version for each namespace comes from [`CacheNamespace`]; bumping it
//! turns every older entry into a miss without a migration step.
//!
//! ```no_run
//! # async fn demo(store: sitecache::store::SharedStore) {
//! use sitecache::cache::{CacheNamespace, VersionedCache};
//!
//! let cache: VersionedCache<Vec<String>> =
//!     VersionedCache::for_namespace(CacheNamespace::BlogIndex, store);
//! cache.set("all", &vec!["hello-world".to_string()], None).await;
//! let slugs = cache.get("all").await;
//! # let _ = slugs;
//! # }
//! ```

mod age;
mod envelope;
mod keys;
mod registry;
mod versioned;

pub use age::format_age;
pub use envelope::{CacheEnvelope, EnvelopeMetadata};
pub use keys::{all_versions_pattern, parse_versioned_key, version_for, versioned_key};
pub use registry::{CacheNamespace, current_version};
pub use versioned::{CacheOptions, EntryStats, Validator, VersionedCache};
