//! Connection lifecycle as an explicit finite-state value.
//!
//! Every change to a connection's state, whether it comes from the retry loop,
//! an explicit disconnect, or a signal emitted by the backend, is expressed as
//! a [`ConnectionEvent`] and folded through [`transition`].

use std::fmt;

use serde::Serialize;

use crate::store::LifecycleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Ended,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect attempt (first or retry) is starting.
    ConnectStarted,
    /// The transport produced a live handle.
    ConnectSucceeded,
    /// One attempt failed; `timed_out` distinguishes the timer from transport errors.
    AttemptFailed { reason: String, timed_out: bool },
    /// No attempts remain.
    RetriesExhausted,
    /// The owner closed the connection.
    DisconnectRequested,
    /// An operation on the connection exceeded its time budget.
    OperationTimedOut,
    /// A signal emitted by the backend itself.
    Backend(LifecycleEvent),
}

/// Compute the next state. Events that are not valid for `state` leave it unchanged.
pub fn transition(state: ConnectionState, event: &ConnectionEvent) -> ConnectionState {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        (S::Disconnected | S::Ended | S::Error, E::ConnectStarted) => S::Connecting,
        (S::Connecting, E::ConnectSucceeded) => S::Connected,
        (S::Connecting, E::AttemptFailed { .. }) => S::Error,
        (S::Connecting | S::Error, E::RetriesExhausted) => S::Disconnected,
        (_, E::DisconnectRequested) => S::Disconnected,
        (S::Connected, E::Backend(LifecycleEvent::End)) => S::Ended,
        // The transport heals itself after `error`/`reconnecting`; only bookkeeping changes.
        (current, _) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ConnectionEvent {
        ConnectionEvent::AttemptFailed {
            reason: "refused".to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn happy_path_reaches_connected() {
        let state = transition(ConnectionState::Disconnected, &ConnectionEvent::ConnectStarted);
        assert_eq!(state, ConnectionState::Connecting);
        let state = transition(state, &ConnectionEvent::ConnectSucceeded);
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn retries_cycle_through_error() {
        let mut state = ConnectionState::Connecting;
        for _ in 0..3 {
            state = transition(state, &failed());
            assert_eq!(state, ConnectionState::Error);
            state = transition(state, &ConnectionEvent::ConnectStarted);
            assert_eq!(state, ConnectionState::Connecting);
        }
        state = transition(state, &failed());
        assert_eq!(
            transition(state, &ConnectionEvent::RetriesExhausted),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn backend_end_marks_connection_ended() {
        let state = transition(
            ConnectionState::Connected,
            &ConnectionEvent::Backend(LifecycleEvent::End),
        );
        assert_eq!(state, ConnectionState::Ended);
        assert_eq!(
            transition(state, &ConnectionEvent::ConnectStarted),
            ConnectionState::Connecting
        );
    }

    #[test]
    fn backend_error_and_reconnecting_keep_connected() {
        for signal in [
            LifecycleEvent::Error("socket reset".to_string()),
            LifecycleEvent::Reconnecting,
        ] {
            assert_eq!(
                transition(ConnectionState::Connected, &ConnectionEvent::Backend(signal)),
                ConnectionState::Connected
            );
        }
    }

    #[test]
    fn explicit_disconnect_always_lands_disconnected() {
        for state in [
            ConnectionState::Connected,
            ConnectionState::Connecting,
            ConnectionState::Error,
            ConnectionState::Ended,
        ] {
            assert_eq!(
                transition(state, &ConnectionEvent::DisconnectRequested),
                ConnectionState::Disconnected
            );
        }
    }

    #[test]
    fn invalid_events_are_ignored() {
        assert_eq!(
            transition(ConnectionState::Connected, &ConnectionEvent::ConnectStarted),
            ConnectionState::Connected
        );
        assert_eq!(
            transition(ConnectionState::Disconnected, &ConnectionEvent::ConnectSucceeded),
            ConnectionState::Disconnected
        );
        assert_eq!(
            transition(
                ConnectionState::Disconnected,
                &ConnectionEvent::Backend(LifecycleEvent::End)
            ),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Ended.to_string(), "ended");
    }
}
