//! Named connections to the remote key-value store.
//!
//! [`ConnectionManager`] hands out one shared store handle per logical name.
//! It bounds connect time and retries, collapses concurrent connects for the
//! same name into one attempt, bounds individual operations through
//! [`ConnectionManager::with_timeout`], and keeps per-name statistics.
//!
//! The manager is an explicit instance: construct one at startup, pass clones
//! to whoever needs the store, and call [`ConnectionManager::shutdown`] before
//! the process exits.

mod config;
mod error;
mod managed;
mod state;
mod stats;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::{
    Connector, Established, KvStore, LifecycleEvent, SharedStore, StoreError, redact_url,
};

pub use config::{ConnectOptions, FailureMode, ManagerConfig};
pub use error::{AttemptFailure, ConnectionError};
pub use managed::ManagedClient;
pub use state::{ConnectionEvent, ConnectionState, transition};
pub use stats::ConnectionStats;

const METRIC_CONNECT_TOTAL: &str = "sitecache_connection_connect_total";
const METRIC_CONNECT_FAILURE_TOTAL: &str = "sitecache_connection_connect_failure_total";
const METRIC_DISCONNECT_TOTAL: &str = "sitecache_connection_disconnect_total";
const METRIC_ERROR_TOTAL: &str = "sitecache_connection_error_total";
const METRIC_TIMEOUT_TOTAL: &str = "sitecache_connection_timeout_total";
const METRIC_CONNECT_MS: &str = "sitecache_connection_connect_ms";

type ConnectOutcome = Result<SharedStore, ConnectionError>;
type PendingConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

struct ConnectionSlot {
    state: ConnectionState,
    client: Option<SharedStore>,
    /// Identifies the attempt (and, once connected, the session) this slot belongs to.
    generation: Uuid,
    pending: Option<PendingConnect>,
}

impl ConnectionSlot {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            client: None,
            generation: Uuid::nil(),
            pending: None,
        }
    }
}

struct ManagerInner {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    connections: DashMap<String, ConnectionSlot>,
    stats: DashMap<String, ConnectionStats>,
}

/// Owner of every named connection and its statistics.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                connections: DashMap::new(),
                stats: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// A [`KvStore`](crate::store::KvStore) that routes every call for `name`
    /// through [`Self::with_timeout`].
    pub fn managed(&self, name: impl Into<String>) -> ManagedClient {
        ManagedClient::new(self.clone(), name.into())
    }

    /// Return the open client for `name`, connecting if needed.
    ///
    /// `Ok(None)` means no URL is configured for this connection: the feature
    /// is unavailable, which is not an error. Concurrent callers for the same
    /// name share a single connect attempt.
    pub async fn get_client(
        &self,
        name: &str,
        url: Option<&str>,
        options: ConnectOptions,
    ) -> Result<Option<SharedStore>, ConnectionError> {
        let pending = match self.inner.connections.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if let Some(client) = self.inner.live_client(name, slot) {
                    return Ok(Some(client));
                }
                match slot.pending.clone() {
                    Some(pending) => {
                        debug!(name, "joining in-flight connect");
                        pending
                    }
                    None => {
                        let Some(url) = self.resolve_url(url) else {
                            debug!(name, "no store url configured; client unavailable");
                            return Ok(None);
                        };
                        self.begin_connect(name, url, options, slot)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let Some(url) = self.resolve_url(url) else {
                    debug!(name, "no store url configured; client unavailable");
                    return Ok(None);
                };
                let mut slot = ConnectionSlot::new();
                let pending = self.begin_connect(name, url, options, &mut slot);
                vacant.insert(slot);
                pending
            }
        };

        pending.await.map(Some)
    }

    /// Run `operation` against the client for `name` within `timeout`
    /// (the configured operation timeout when `None`).
    ///
    /// Returns `Ok(None)` when no client is configured. Timeouts, operation
    /// errors and exhausted connects are logged with the operation name and
    /// elapsed time, then either swallowed into `Ok(None)` (degrade mode) or
    /// returned (strict mode).
    pub async fn with_timeout<R, F, Fut>(
        &self,
        name: &str,
        operation_name: &str,
        timeout: Option<Duration>,
        operation: F,
    ) -> Result<Option<R>, ConnectionError>
    where
        F: FnOnce(SharedStore) -> Fut,
        Fut: Future<Output = Result<R, StoreError>>,
    {
        let started = Instant::now();

        let client = match self.get_client(name, None, ConnectOptions::default()).await {
            Ok(Some(client)) => client,
            Ok(None) => return Ok(None),
            Err(err) => return self.fail_operation(name, operation_name, started, err),
        };

        let limit = timeout.unwrap_or(self.inner.config.operation_timeout);
        match tokio::time::timeout(limit, operation(client)).await {
            Ok(Ok(value)) => {
                debug!(
                    name,
                    operation = operation_name,
                    elapsed_ms = elapsed_ms(started),
                    "store operation completed"
                );
                Ok(Some(value))
            }
            Ok(Err(source)) => {
                let err = ConnectionError::Operation {
                    name: name.to_string(),
                    operation: operation_name.to_string(),
                    source,
                };
                self.fail_operation(name, operation_name, started, err)
            }
            Err(_) => {
                self.inner.observe(name, &ConnectionEvent::OperationTimedOut);
                counter!(METRIC_TIMEOUT_TOTAL, "name" => name.to_string(), "kind" => "operation")
                    .increment(1);
                let err = ConnectionError::OperationTimeout {
                    name: name.to_string(),
                    operation: operation_name.to_string(),
                    timeout: limit,
                };
                self.fail_operation(name, operation_name, started, err)
            }
        }
    }

    /// Close the connection for `name`. Unknown names are a no-op.
    pub async fn disconnect(&self, name: &str) {
        let Some((_, slot)) = self.inner.connections.remove(name) else {
            debug!(name, "disconnect requested for unknown connection");
            return;
        };

        let next = transition(slot.state, &ConnectionEvent::DisconnectRequested);
        let Some(client) = slot.client else {
            debug!(name, from = %slot.state, to = %next, "cleared connection without live handle");
            return;
        };

        if let Err(err) = client.close().await {
            warn!(name, error = %err, "error while closing store handle");
        }
        self.inner.observe(name, &ConnectionEvent::DisconnectRequested);
        counter!(METRIC_DISCONNECT_TOTAL, "name" => name.to_string(), "cause" => "requested")
            .increment(1);
        info!(name, from = %slot.state, to = %next, "store connection closed");
    }

    /// Close every connection.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self
            .inner
            .connections
            .iter()
            .map(|slot| slot.key().clone())
            .collect();
        join_all(names.iter().map(|name| self.disconnect(name))).await;
    }

    /// Dispose of the manager's connections and log a final status line per name.
    pub async fn shutdown(&self) {
        info!("shutting down store connections");
        self.disconnect_all().await;
        self.log_status();
    }

    /// Current state for `name`; names without an entry are `Disconnected`.
    pub fn state(&self, name: &str) -> ConnectionState {
        self.inner
            .connections
            .get(name)
            .map(|slot| slot.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn get_stats(&self, name: &str) -> Option<ConnectionStats> {
        self.inner.stats.get(name).map(|stats| stats.clone())
    }

    pub fn get_all_stats(&self) -> BTreeMap<String, ConnectionStats> {
        self.inner
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Emit one log line per known connection.
    pub fn log_status(&self) {
        let all = self.get_all_stats();
        if all.is_empty() {
            info!("no store connections have been attempted");
            return;
        }
        for (name, stats) in all {
            info!(
                name = %name,
                state = %self.state(&name),
                connects = stats.connects,
                disconnects = stats.disconnects,
                errors = stats.errors,
                timeouts = stats.timeouts,
                reconnects = stats.reconnects,
                last_error = stats.last_error.as_deref().unwrap_or("-"),
                "store connection status"
            );
        }
    }

    fn resolve_url(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .or(self.inner.config.default_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }

    fn begin_connect(
        &self,
        name: &str,
        url: String,
        options: ConnectOptions,
        slot: &mut ConnectionSlot,
    ) -> PendingConnect {
        let generation = Uuid::new_v4();
        slot.generation = generation;
        slot.client = None;
        slot.state = transition(slot.state, &ConnectionEvent::ConnectStarted);
        self.inner.stats.entry(name.to_string()).or_default();

        let weak = Arc::downgrade(&self.inner);
        let name = name.to_string();
        let pending = async move {
            match weak.upgrade() {
                Some(inner) => inner.create_connection(name, url, options, generation).await,
                None => Err(ConnectionError::Superseded { name }),
            }
        }
        .boxed()
        .shared();

        slot.pending = Some(pending.clone());
        pending
    }

    fn fail_operation<R>(
        &self,
        name: &str,
        operation_name: &str,
        started: Instant,
        err: ConnectionError,
    ) -> Result<Option<R>, ConnectionError> {
        let elapsed_ms = elapsed_ms(started);
        match self.inner.config.mode {
            FailureMode::Degrade => {
                warn!(
                    name,
                    operation = operation_name,
                    elapsed_ms,
                    error = %err,
                    "store operation failed; returning empty result"
                );
                Ok(None)
            }
            FailureMode::Strict => {
                error!(
                    name,
                    operation = operation_name,
                    elapsed_ms,
                    error = %err,
                    "store operation failed"
                );
                Err(err)
            }
        }
    }
}

impl ManagerInner {
    async fn create_connection(
        self: Arc<Self>,
        name: String,
        url: String,
        options: ConnectOptions,
        generation: Uuid,
    ) -> ConnectOutcome {
        let timeout = options.timeout.unwrap_or(self.config.connect_timeout);
        let max_attempts = options.max_retries.unwrap_or(self.config.max_retries).max(1);
        let display_url = redact_url(&url);
        let started = Instant::now();
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.apply(&name, generation, &ConnectionEvent::ConnectStarted);
            }

            debug!(name = %name, url = %display_url, attempt, max_attempts, "connecting to store");
            let failure = match tokio::time::timeout(timeout, self.connector.connect(&url)).await {
                Ok(Ok(established)) => {
                    histogram!(METRIC_CONNECT_MS, "name" => name.clone())
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    return self.install(&name, generation, established, attempt).await;
                }
                Ok(Err(err)) => AttemptFailure::Store(err),
                Err(_) => AttemptFailure::Timeout(timeout),
            };

            warn!(
                name = %name,
                url = %display_url,
                attempt,
                max_attempts,
                elapsed_ms = elapsed_ms(started),
                error = %failure,
                "store connect attempt failed"
            );
            counter!(METRIC_CONNECT_FAILURE_TOTAL, "name" => name.clone()).increment(1);
            if failure.is_timeout() {
                counter!(METRIC_TIMEOUT_TOTAL, "name" => name.clone(), "kind" => "connect")
                    .increment(1);
            }
            self.apply(
                &name,
                generation,
                &ConnectionEvent::AttemptFailed {
                    reason: failure.to_string(),
                    timed_out: failure.is_timeout(),
                },
            );
            last_failure = Some(failure);

            if attempt < max_attempts {
                tokio::time::sleep(self.config.backoff_for(attempt)).await;
            }
        }

        self.apply(&name, generation, &ConnectionEvent::RetriesExhausted);
        if let Some(mut slot) = self.connections.get_mut(&name) {
            if slot.generation == generation {
                slot.pending = None;
            }
        }

        let last = last_failure.unwrap_or(AttemptFailure::Timeout(timeout));
        error!(
            name = %name,
            url = %display_url,
            attempts = max_attempts,
            elapsed_ms = elapsed_ms(started),
            error = %last,
            "giving up on store connection"
        );
        Err(ConnectionError::Exhausted {
            name,
            attempts: max_attempts,
            last,
        })
    }

    /// Register a freshly connected handle, unless the slot moved on meanwhile.
    async fn install(
        self: Arc<Self>,
        name: &str,
        generation: Uuid,
        established: Established,
        attempt: u32,
    ) -> ConnectOutcome {
        let Established { client, events } = established;

        let installed = match self.connections.get_mut(name) {
            Some(mut slot) if slot.generation == generation => {
                slot.client = Some(Arc::clone(&client));
                slot.pending = None;
                slot.state = transition(slot.state, &ConnectionEvent::ConnectSucceeded);
                true
            }
            _ => false,
        };

        if !installed {
            warn!(name, "connection closed while connecting; discarding new handle");
            if let Err(err) = client.close().await {
                debug!(name, error = %err, "error closing discarded handle");
            }
            return Err(ConnectionError::Superseded {
                name: name.to_string(),
            });
        }

        self.observe(name, &ConnectionEvent::ConnectSucceeded);
        counter!(METRIC_CONNECT_TOTAL, "name" => name.to_string()).increment(1);
        info!(name, attempt, session = %generation, "store connection established");

        tokio::spawn(watch_lifecycle(
            Arc::downgrade(&self),
            name.to_string(),
            generation,
            events,
        ));

        Ok(client)
    }

    /// The slot's client if it is connected and still open.
    ///
    /// A handle that closed without its `end` signal having been processed yet
    /// is retired here so the caller reconnects.
    fn live_client(&self, name: &str, slot: &mut ConnectionSlot) -> Option<SharedStore> {
        let client = slot.client.as_ref()?;
        if slot.state == ConnectionState::Connected && client.is_open() {
            return Some(Arc::clone(client));
        }

        let event = ConnectionEvent::Backend(LifecycleEvent::End);
        slot.client = None;
        slot.state = transition(slot.state, &event);
        self.observe(name, &event);
        counter!(METRIC_DISCONNECT_TOTAL, "name" => name.to_string(), "cause" => "closed")
            .increment(1);
        warn!(name, "store handle found closed; reconnecting");
        None
    }

    /// Handle one backend signal. Returns `false` once the session is over.
    fn on_backend_event(&self, name: &str, generation: Uuid, signal: LifecycleEvent) -> bool {
        let event = ConnectionEvent::Backend(signal);
        let Some(mut slot) = self.connections.get_mut(name) else {
            return false;
        };
        if slot.generation != generation || slot.client.is_none() {
            return false;
        }

        let from = slot.state;
        slot.state = transition(from, &event);
        let ended = matches!(event, ConnectionEvent::Backend(LifecycleEvent::End));
        if ended {
            slot.client = None;
        }
        let to = slot.state;
        drop(slot);

        self.observe(name, &event);
        match &event {
            ConnectionEvent::Backend(LifecycleEvent::Error(message)) => {
                counter!(METRIC_ERROR_TOTAL, "name" => name.to_string()).increment(1);
                warn!(name, error = %message, "store connection reported an error");
            }
            ConnectionEvent::Backend(LifecycleEvent::Reconnecting) => {
                info!(name, "store connection reconnecting");
            }
            _ => {
                counter!(METRIC_DISCONNECT_TOTAL, "name" => name.to_string(), "cause" => "ended")
                    .increment(1);
                warn!(name, from = %from, to = %to, "store connection ended by backend");
            }
        }

        !ended
    }

    /// Apply a state-machine event to the slot owned by `generation`, and to the stats.
    fn apply(&self, name: &str, generation: Uuid, event: &ConnectionEvent) {
        if let Some(mut slot) = self.connections.get_mut(name) {
            if slot.generation == generation {
                slot.state = transition(slot.state, event);
            }
        }
        self.observe(name, event);
    }

    fn observe(&self, name: &str, event: &ConnectionEvent) {
        self.stats
            .entry(name.to_string())
            .or_default()
            .observe(event, OffsetDateTime::now_utc());
    }
}

async fn watch_lifecycle(
    inner: Weak<ManagerInner>,
    name: String,
    generation: Uuid,
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
) {
    while let Some(signal) = events.recv().await {
        let Some(manager) = inner.upgrade() else {
            break;
        };
        if !manager.on_backend_event(&name, generation, signal) {
            break;
        }
    }
    debug!(name = %name, session = %generation, "lifecycle watcher stopped");
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
