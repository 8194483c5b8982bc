//! A self-healing [Server-Sent Events](https://html.spec.whatwg.org/multipage/server-sent-events.html)
//! client for live telemetry from embedded devices on a local network.
//!
//! Devices like inverters and battery controllers publish a `live` event stream that is
//! expected to stay open for days. In practice it drops, goes quiet without closing, or
//! moves to a new address. `livefeed` keeps it flowing:
//!
//! - [`Manager`] - the connection itself: auth detection, a stale-data heartbeat,
//!   bounded linear backoff, address re-resolution and live settings updates. Telemetry
//!   and lifecycle events are delivered to your [`LiveHandler`].
//! - [`auth`] - probes whether the device wants no auth, Basic or Digest, and builds
//!   a [`Requester`][auth::Requester] that attaches the right credentials.
//! - [`FrameParser`] - an incremental SSE parser that survives frames split at any byte.
//! - [`ByteSource`] - adapts readers, streams, channels and [`reqwest::Response`]s into one
//!   chunk stream, decoded to UTF-8 by [`Utf8Stream`][utf8_stream::Utf8Stream].
//!
//! # Quick start
//!
//! ```no_run
//! use livefeed::{ConnectionConfig, Error, LiveHandler, Manager};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Telemetry {
//!     battery_soc: f64,
//! }
//!
//! struct Dashboard;
//!
//! impl LiveHandler for Dashboard {
//!     type Payload = Telemetry;
//!
//!     fn on_data(&self, telemetry: Telemetry) {
//!         println!("battery at {}%", telemetry.battery_soc);
//!     }
//!
//!     fn on_error(&self, error: &Error) {
//!         eprintln!("live stream: {error}");
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> livefeed::Result<()> {
//! let config = ConnectionConfig::new("192.168.1.40").credentials("customer", "hunter2");
//! let manager = Manager::new(config, Dashboard)?;
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Parsing without a connection
//!
//! ```rust
//! use livefeed::FrameParser;
//!
//! let mut parser = FrameParser::new();
//! assert!(parser.feed("event: live\ndata: {\"a\"").is_empty());
//!
//! let frames = parser.feed(":1}\n\n");
//! assert_eq!(frames[0].event, "live");
//! assert_eq!(frames[0].data, "{\"a\":1}");
//! ```
//!
//! Logging goes through [`tracing`]; install any subscriber to see it.

pub mod auth;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame;
pub mod handler;
pub mod heartbeat;
pub mod manager;
pub mod parser;
pub mod resolve;
pub mod retry;
pub mod source;
pub mod state;
pub mod utf8_stream;

pub use auth::{AuthPreference, AuthScheme};
pub use config::ConnectionConfig;
pub use errors::{Error, Result};
pub use frame::Frame;
pub use handler::LiveHandler;
pub use manager::{Manager, ManagerBuilder};
pub use parser::FrameParser;
pub use resolve::{AddressResolver, Resolution};
pub use retry::{Backoff, ReconnectPolicy};
pub use source::ByteSource;
pub use state::{ConnectionState, Status};
