//! Resilient store connections and a versioned, self-healing cache for the
//! site's derived data.
//!
//! - [`connection`]: one shared handle per logical connection name, with
//!   bounded connect and operation time and per-name statistics.
//! - [`cache`]: JSON envelopes under `{namespace}:v{version}:{key}` that turn
//!   schema drift into cache misses.
//! - [`store`]: the key-value contract plus `memory://` and `redis://`
//!   transports.

pub mod activity;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod infra;
pub mod store;
