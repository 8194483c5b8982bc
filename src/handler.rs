//! Consumer-facing callbacks.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::errors::Error;

/// Receives telemetry and lifecycle notifications from a [`Manager`][crate::Manager].
///
/// All callbacks run on the connection's driver task, one at a time, and the
/// next chunk is not read until they return. Keep them short; hand heavy work
/// off to another task.
pub trait LiveHandler: Send + Sync + 'static {
    /// What each `live` frame's JSON payload decodes into.
    /// [`serde_json::Value`] works if you don't want a schema.
    type Payload: DeserializeOwned;

    /// Called for every decoded `live` frame
    fn on_data(&self, payload: Self::Payload);

    /// Called when the stream is established (or re-established).
    ///
    /// Default implementation does nothing.
    fn on_connect(&self) {}

    /// Called for authentication failures, transport failures, stale
    /// connections and exhaustion. Frames that fail to decode are only logged.
    ///
    /// Default implementation does nothing.
    fn on_error(&self, _error: &Error) {}

    /// Called when a live connection is lost, and once per `stop()`.
    ///
    /// Default implementation does nothing.
    fn on_disconnect(&self) {}

    /// Called once the reconnect bound is reached and automatic recovery stops.
    ///
    /// Default implementation does nothing.
    fn on_give_up(&self, _attempts: u32) {}
}

impl<H: LiveHandler> LiveHandler for Arc<H> {
    type Payload = H::Payload;

    fn on_data(&self, payload: Self::Payload) {
        (**self).on_data(payload)
    }

    fn on_connect(&self) {
        (**self).on_connect()
    }

    fn on_error(&self, error: &Error) {
        (**self).on_error(error)
    }

    fn on_disconnect(&self) {
        (**self).on_disconnect()
    }

    fn on_give_up(&self, attempts: u32) {
        (**self).on_give_up(attempts)
    }
}
