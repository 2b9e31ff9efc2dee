//! Redis transport backed by a multiplexed tokio connection.
//!
//! The redis client has no callback surface for lifecycle signals, so they
//! are derived from command results: IO failures emit `Error`, and a dropped
//! connection emits `End` and marks the handle closed so the manager
//! reconnects on next use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ::redis::{AsyncCommands, Client, RedisError, aio::MultiplexedConnection};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connector, Established, KvStore, LifecycleEvent, StoreError, redact_url};

/// Connector for `redis://` and `rediss://` URLs.
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, url: &str) -> Result<Established, StoreError> {
        let client = Client::open(url)
            .map_err(|err| StoreError::unsupported_url(redact_url(url), err.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreError::connection(err.to_string()))?;

        debug!(url = %redact_url(url), "redis connection established");

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RedisHandle {
            conn,
            open: Arc::new(AtomicBool::new(true)),
            events: tx,
        };

        Ok(Established {
            client: Arc::new(handle),
            events: rx,
        })
    }
}

struct RedisHandle {
    conn: MultiplexedConnection,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl RedisHandle {
    fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.clone())
    }

    fn fail(&self, op: &'static str, err: RedisError) -> StoreError {
        if err.is_connection_dropped() {
            let _ = self.events.send(LifecycleEvent::Error(err.to_string()));
            if self.open.swap(false, Ordering::SeqCst) {
                let _ = self.events.send(LifecycleEvent::End);
            }
        } else if err.is_io_error() || err.is_timeout() {
            let _ = self.events.send(LifecycleEvent::Error(err.to_string()));
        }
        StoreError::command(op, err.to_string())
    }
}

#[async_trait]
impl KvStore for RedisHandle {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection()?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|err| self.fail("get", err))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|err| self.fail("set", err))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        ttl_seconds: u64,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(|err| self.fail("set_with_expiry", err))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        conn.del::<_, u64>(keys)
            .await
            .map_err(|err| self.fail("delete", err))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection()?;
        let mut iter = conn
            .scan_match::<_, String>(pattern)
            .await
            .map_err(|err| self.fail("keys_matching", err))?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection()?;
        conn.ttl::<_, i64>(key)
            .await
            .map_err(|err| self.fail("ttl", err))
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Multiplexed connections close when the last clone is dropped.
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
