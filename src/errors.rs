//! Error type shared by every layer of the crate

use core::str::Utf8Error;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The device rejected our credentials on the live stream
    #[error("authentication rejected by device ({status})")]
    Authentication { status: StatusCode },

    /// Connection refused, DNS failure, reset, ...
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Non-success status other than 401
    #[error("unexpected HTTP status {status}")]
    Status { status: StatusCode },

    #[error("event stream ended")]
    StreamEnded,

    #[error("response body is empty")]
    EmptyBody,

    /// The stream contained invalid UTF-8
    #[error("invalid utf-8 in event stream: {0}")]
    Utf8(#[from] Utf8Error),

    /// Connection is open but no telemetry arrived within the heartbeat timeout
    #[error("no data received for {elapsed:?}")]
    Stale { elapsed: Duration },

    /// A single frame could not be decoded
    #[error("malformed `{event}` frame: {message}")]
    Protocol { event: String, message: String },

    #[error("gave up after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },

    #[error("configuration error: {message}")]
    Config { message: String },

    /// The connection driver is no longer running
    #[error("connection manager has shut down")]
    Closed,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    pub fn protocol(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            event: event.into(),
            message: message.into(),
        }
    }

    /// Whether the reconnect loop should keep trying after this error.
    ///
    /// Credential rejection, exhaustion and bad configuration need someone
    /// outside the connection to act first.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Self::Authentication { .. } | Self::Exhausted { .. } | Self::Config { .. } | Self::Closed
        )
    }

    pub fn is_auth_err(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(Error::timeout(Duration::from_secs(5)).is_retriable());
        assert!(Error::StreamEnded.is_retriable());
        assert!(
            Error::Stale {
                elapsed: Duration::from_secs(301)
            }
            .is_retriable()
        );
        assert!(
            Error::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR
            }
            .is_retriable()
        );

        let auth = Error::Authentication {
            status: StatusCode::UNAUTHORIZED,
        };
        assert!(!auth.is_retriable());
        assert!(auth.is_auth_err());
        assert!(!Error::Exhausted { attempts: 10 }.is_retriable());
        assert!(!Error::config("bad host").is_retriable());
    }

    #[test]
    fn display_mentions_context() {
        let err = Error::protocol("live", "expected value at line 1 column 1");
        assert_eq!(
            err.to_string(),
            "malformed `live` frame: expected value at line 1 column 1"
        );
        assert_eq!(
            Error::Exhausted { attempts: 3 }.to_string(),
            "gave up after 3 reconnect attempts"
        );
    }
}
