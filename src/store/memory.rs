//! In-process key-value transport.
//!
//! Every handle produced by one [`MemoryConnector`] shares the same
//! [`MemoryStore`], the way clients of one server share its keyspace. The
//! connector can inject connect latency, connect failures, hanging connects,
//! backend unavailability and lifecycle signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{
    Connector, Established, KvStore, LifecycleEvent, StoreError, TTL_MISSING, TTL_PERSISTENT,
};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Shared keyspace with TTL bookkeeping.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Read a raw value, bypassing any client.
    pub fn raw_get(&self, key: &str) -> Option<String> {
        self.read(key)
    }

    /// Write a raw value without expiry, bypassing any client.
    pub fn raw_set(&self, key: &str, value: impl Into<String>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read(key).is_some()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self, op: &'static str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::command(op, "memory store unavailable"));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    fn write(&self, key: &str, value: &str, expires_at: Option<Instant>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    fn remove(&self, keys: &[String]) -> u64 {
        let now = Instant::now();
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count() as u64
    }

    fn scan(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn remaining_ttl(&self, key: &str) -> i64 {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => TTL_MISSING,
            Some(entry) => match entry.expires_at {
                // Rounded to the nearest second.
                Some(deadline) => {
                    let millis = i64::try_from((deadline - now).as_millis()).unwrap_or(i64::MAX);
                    millis.saturating_add(500) / 1000
                }
                None => TTL_PERSISTENT,
            },
            None => TTL_MISSING,
        }
    }
}

struct Session {
    events: mpsc::UnboundedSender<LifecycleEvent>,
    open: Arc<AtomicBool>,
}

/// Connector for `memory://` URLs and test doubles.
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    connects: Arc<AtomicUsize>,
    pending_failures: Arc<AtomicU32>,
    hang: Arc<AtomicBool>,
    latency: Duration,
    sessions: Arc<DashMap<Uuid, Session>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            connects: Arc::new(AtomicUsize::new(0)),
            pending_failures: Arc::new(AtomicU32::new(0)),
            hang: Arc::new(AtomicBool::new(false)),
            latency: Duration::ZERO,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Delay every connect attempt by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Make connect attempts never resolve until turned off again.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// How many times `connect` has been invoked.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of handles that are still open.
    pub fn open_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|session| session.open.load(Ordering::SeqCst))
            .count()
    }

    /// Deliver a lifecycle signal to every open handle.
    ///
    /// `End` also closes the handles, as a backend hang-up would.
    pub fn emit(&self, event: LifecycleEvent) {
        let ending = event == LifecycleEvent::End;
        self.sessions.retain(|_, session| {
            let _ = session.events.send(event.clone());
            if ending {
                session.open.store(false, Ordering::SeqCst);
            }
            !ending
        });
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Established, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::connection(format!(
                "injected connect failure for {url}"
            )));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        self.sessions.insert(
            id,
            Session {
                events: tx,
                open: Arc::clone(&open),
            },
        );
        debug!(session = %id, "memory store session opened");

        let client = MemoryClient {
            id,
            store: self.store.clone(),
            open,
            sessions: Arc::clone(&self.sessions),
        };

        Ok(Established {
            client: Arc::new(client),
            events: rx,
        })
    }
}

struct MemoryClient {
    id: Uuid,
    store: MemoryStore,
    open: Arc<AtomicBool>,
    sessions: Arc<DashMap<Uuid, Session>>,
}

impl MemoryClient {
    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.store.ensure_available(op)
    }
}

#[async_trait]
impl KvStore for MemoryClient {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check("get")?;
        Ok(self.store.read(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check("set")?;
        self.store.write(key, value, None);
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        ttl_seconds: u64,
        value: &str,
    ) -> Result<(), StoreError> {
        self.check("set_with_expiry")?;
        let deadline = Some(ttl_seconds)
            .filter(|seconds| *seconds > 0)
            .and_then(|seconds| Instant::now().checked_add(Duration::from_secs(seconds)))
            .ok_or_else(|| StoreError::command("set_with_expiry", "invalid expire time"))?;
        self.store.write(key, value, Some(deadline));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check("delete")?;
        Ok(self.store.remove(keys))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check("keys_matching")?;
        Ok(self.store.scan(pattern))
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        self.check("ttl")?;
        Ok(self.store.remaining_ttl(key))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.open.store(false, Ordering::SeqCst);
        self.sessions.remove(&self.id);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    Literal(char),
    AnyOne,
    AnyRun,
}

fn tokenize(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        let token = match ch {
            '*' => GlobToken::AnyRun,
            '?' => GlobToken::AnyOne,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            other => GlobToken::Literal(other),
        };
        tokens.push(token);
    }
    tokens
}

/// Match `text` against a Redis-style glob supporting `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(GlobToken::AnyRun) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(GlobToken::AnyOne) => {
                p += 1;
                t += 1;
            }
            Some(GlobToken::Literal(ch)) if *ch == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    tokens[p..].iter().all(|token| *token == GlobToken::AnyRun)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected(connector: &MemoryConnector) -> Established {
        connector
            .connect("memory://test")
            .await
            .expect("memory connect should succeed")
    }

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("feed:v*:all", "feed:v2:all"));
        assert!(glob_match("feed:v*:all", "feed:v10:all"));
        assert!(!glob_match("feed:v*:all", "feed:v2:other"));
        assert!(glob_match("feed:v?:all", "feed:v2:all"));
        assert!(!glob_match("feed:v?:all", "feed:v10:all"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "a--b--c"));
        assert!(!glob_match("a*b*c", "a--b--"));
    }

    #[test]
    fn glob_escapes_are_literal() {
        assert!(glob_match(r"ns:v*:odd\*key", "ns:v1:odd*key"));
        assert!(!glob_match(r"ns:v*:odd\*key", "ns:v1:oddXkey"));
        assert!(glob_match(r"ns:v*:q\?", "ns:v3:q?"));
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let connector = MemoryConnector::new();
        let client = connected(&connector).await.client;

        client.set("k", "v").await.expect("set");
        assert_eq!(client.get("k").await.expect("get").as_deref(), Some("v"));
        assert_eq!(client.ttl("k").await.expect("ttl"), TTL_PERSISTENT);

        let removed = client
            .delete(&["k".to_string(), "missing".to_string()])
            .await
            .expect("delete");
        assert_eq!(removed, 1);
        assert_eq!(client.get("k").await.expect("get"), None);
        assert_eq!(client.ttl("k").await.expect("ttl"), TTL_MISSING);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let connector = MemoryConnector::new();
        let client = connected(&connector).await.client;

        client
            .set_with_expiry("short", 10, "lived")
            .await
            .expect("set");
        assert_eq!(client.ttl("short").await.expect("ttl"), 10);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(client.ttl("short").await.expect("ttl"), 6);

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(client.get("short").await.expect("get"), None);
        assert!(connector.store().is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let connector = MemoryConnector::new();
        let client = connected(&connector).await.client;
        let err = client
            .set_with_expiry("k", 0, "v")
            .await
            .expect_err("zero ttl must fail");
        assert!(matches!(err, StoreError::Command { .. }));
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_rejected() {
        let connector = MemoryConnector::new();
        let client = connected(&connector).await.client;
        let err = client
            .set_with_expiry("k", u64::MAX, "v")
            .await
            .expect_err("overflowing ttl must fail");
        assert!(matches!(err, StoreError::Command { .. }));
        assert!(connector.store().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let connector = MemoryConnector::new();
        connector.fail_next_connects(2);

        assert!(connector.connect("memory://a").await.is_err());
        assert!(connector.connect("memory://a").await.is_err());
        assert!(connector.connect("memory://a").await.is_ok());
        assert_eq!(connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn unavailable_store_fails_commands() {
        let connector = MemoryConnector::new();
        let client = connected(&connector).await.client;

        connector.store().set_available(false);
        assert!(client.get("k").await.is_err());

        connector.store().set_available(true);
        assert!(client.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn end_signal_closes_sessions() {
        let connector = MemoryConnector::new();
        let Established { client, mut events } = connected(&connector).await;
        assert_eq!(connector.open_sessions(), 1);

        connector.emit(LifecycleEvent::End);

        assert_eq!(events.recv().await, Some(LifecycleEvent::End));
        assert!(!client.is_open());
        assert!(matches!(client.get("k").await, Err(StoreError::Closed)));
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn close_marks_handle_closed() {
        let connector = MemoryConnector::new();
        let client = connected(&connector).await.client;
        client.close().await.expect("close");
        assert!(!client.is_open());
        assert_eq!(connector.open_sessions(), 0);
    }
}
