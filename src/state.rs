//! Connection lifecycle states

use std::fmt;

use serde::Serialize;

/// Where a [`Manager`][crate::Manager] is in its lifecycle.
///
/// One enum instead of separate "connected" and "stopped" flags, so a
/// connection can't be both at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// Not connected and not trying to be: freshly built, credentials rejected, or out of
    /// reconnect attempts
    #[default]
    Idle,
    /// Resolving auth and waiting for the response head
    Connecting,
    /// Streaming
    Connected,
    /// A fault was seen and is being reported
    Erroring,
    /// Waiting out the backoff before the next attempt
    ReconnectScheduled,
    /// Explicitly stopped, nothing happens until `start()`
    Stopped,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a connection or a pending reconnect exists that `stop()` would tear down
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Erroring | Self::ReconnectScheduled
        )
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            // stop() and start() are accepted from anywhere
            (_, Stopped) | (_, Connecting) => true,
            (Connecting, Connected) | (Connecting, Erroring) | (Connecting, Idle) => true,
            (Connected, Erroring) => true,
            (Erroring, ReconnectScheduled) | (Erroring, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Erroring => "erroring",
            ConnectionState::ReconnectScheduled => "reconnect-scheduled",
            ConnectionState::Stopped => "stopped",
        };
        name.fmt(f)
    }
}

/// Snapshot published by the driver after every change
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub url: String,
}

impl Status {
    pub(crate) fn new(state: ConnectionState, reconnect_attempts: u32, url: String) -> Self {
        Self {
            state,
            connected: state.is_connected(),
            reconnect_attempts,
            url,
        }
    }
}
