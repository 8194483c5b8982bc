use std::time::Duration;

pub(crate) const LF: u8 = b'\n';
pub(crate) const CR: u8 = b'\r';

/// Event name given to frames that carry no `event:` field
pub const MESSAGE_EVENT: &str = "message";
/// Event name of telemetry frames on the live endpoint
pub const LIVE_EVENT: &str = "live";

pub const LIVE_PATH: &str = "/api/v1/live";
pub const PROBE_PATH: &str = "/api/v1/system";

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Reconnect delays stop growing after this many multiples of the base delay
pub const MAX_BACKOFF_MULTIPLIER: u32 = 5;

pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 32;
