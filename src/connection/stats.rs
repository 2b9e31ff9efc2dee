use serde::Serialize;
use time::OffsetDateTime;

use crate::store::LifecycleEvent;

use super::state::ConnectionEvent;

/// Per-connection counters, updated only by the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connects: u64,
    pub disconnects: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub reconnects: u64,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_connected_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_disconnected_at: Option<OffsetDateTime>,
}

impl ConnectionStats {
    /// Fold a lifecycle event into the counters.
    pub(crate) fn observe(&mut self, event: &ConnectionEvent, now: OffsetDateTime) {
        match event {
            ConnectionEvent::ConnectSucceeded => {
                self.connects += 1;
                self.last_connected_at = Some(now);
            }
            ConnectionEvent::AttemptFailed { reason, timed_out } => {
                if *timed_out {
                    self.timeouts += 1;
                } else {
                    self.errors += 1;
                }
                self.last_error = Some(reason.clone());
            }
            ConnectionEvent::OperationTimedOut => self.timeouts += 1,
            ConnectionEvent::Backend(LifecycleEvent::Error(message)) => {
                self.errors += 1;
                self.last_error = Some(message.clone());
            }
            ConnectionEvent::Backend(LifecycleEvent::Reconnecting) => self.reconnects += 1,
            ConnectionEvent::Backend(LifecycleEvent::End) | ConnectionEvent::DisconnectRequested => {
                self.disconnects += 1;
                self.last_disconnected_at = Some(now);
            }
            ConnectionEvent::ConnectStarted | ConnectionEvent::RetriesExhausted => {}
        }
    }
}
