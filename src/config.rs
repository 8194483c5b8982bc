//! Connection settings for a [`Manager`][crate::Manager].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthPreference,
    constants::{
        DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT,
        DEFAULT_HTTP_PORT, LIVE_PATH,
    },
    errors::{Error, Result},
    retry::ReconnectPolicy,
};

/// Everything needed to reach one device.
///
/// Built with chainable setters on top of [`Default`]:
///
/// ```
/// use std::time::Duration;
/// use livefeed::{AuthPreference, ConnectionConfig};
///
/// let config = ConnectionConfig::new("192.168.1.40")
///     .credentials("customer", "hunter2")
///     .auth(AuthPreference::Digest)
///     .heartbeat_timeout(Duration::from_secs(120));
/// assert_eq!(config.live_url(), "http://192.168.1.40:80/api/v1/live");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Use `https` instead of `http`
    pub tls: bool,
    pub username: String,
    /// No password means no authentication is attempted
    pub password: Option<String>,
    pub auth: AuthPreference,
    /// Bound on the probe and on each connect handshake
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Bound on a single chunk read, off by default since the heartbeat covers quiet streams
    #[serde(with = "duration_ms_opt")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// Identity handed to the [`AddressResolver`][crate::AddressResolver] on reconnect
    pub device_id: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_HTTP_PORT,
            tls: false,
            username: String::new(),
            password: None,
            auth: AuthPreference::Auto,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            device_id: None,
        }
    }
}

impl core::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth", &self.auth)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect", &self.reconnect)
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn auth(mut self, preference: AuthPreference) -> Self {
        self.auth = preference;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect.base_delay = delay;
        self
    }

    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.host.contains('/') {
            return Err(Error::config("host must be a bare hostname or address"));
        }
        if self.port == 0 {
            return Err(Error::config("port must be > 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be > 0"));
        }
        if self.heartbeat_timeout.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat timeout and interval must be > 0"));
        }
        self.reconnect.validate().map_err(Error::config)
    }

    /// Whether a password is configured, i.e. whether auth has to be resolved
    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn live_url(&self) -> String {
        format!("{}{LIVE_PATH}", self.base_url())
    }

    /// Whether moving from `self` to `other` changes where or as whom we connect, the only
    /// changes that are worth dropping a healthy connection for
    pub fn requires_restart(&self, other: &ConnectionConfig) -> bool {
        self.host != other.host
            || self.port != other.port
            || self.tls != other.tls
            || self.username != other.username
            || self.password != other.password
    }
}

/// (De)serialise a [`Duration`] as whole milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub(crate) mod duration_ms_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::duration_ms::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
