//! The resilient live-telemetry connection.
//!
//! A [`Manager`] is a cheap, cloneable handle. The connection itself, and every
//! piece of mutable state belonging to it, lives in a single background task
//! (the driver) that reacts to commands from the handles, chunks from the
//! stream, heartbeat ticks and backoff timers, one at a time. Nothing is shared
//! between tasks except the command channel and a [`watch`] of the current
//! [`Status`].

use std::{sync::Arc, time::Duration};

use bytes_utils::Str;
use futures_util::StreamExt;
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, CACHE_CONTROL, CONNECTION, HeaderValue},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::timeout,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    auth::{AuthPreference, AuthScheme, Requester, Unauthenticated, detect_scheme, request_factory},
    config::ConnectionConfig,
    constants::COMMAND_CHANNEL_CAPACITY,
    errors::{Error, Result},
    frame::Frame,
    handler::LiveHandler,
    heartbeat::Heartbeat,
    parser::FrameParser,
    resolve::AddressResolver,
    retry::Backoff,
    source::{ByteSource, TextStream},
    state::{ConnectionState, Status},
};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Sent from a [`Manager`] handle to the driver. Every command is acknowledged once the
/// driver has acted on it.
#[derive(Debug)]
enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    UpdateSettings(Box<ConnectionConfig>, oneshot::Sender<Result<()>>),
    ResetReconnectCounter(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// Public API: Manager
// ---------------------------------------------------------------------------

/// Handle to one device's live telemetry stream.
///
/// ```no_run
/// use livefeed::{ConnectionConfig, LiveHandler, Manager};
///
/// struct Print;
///
/// impl LiveHandler for Print {
///     type Payload = serde_json::Value;
///
///     fn on_data(&self, payload: serde_json::Value) {
///         println!("{payload}");
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> livefeed::Result<()> {
/// let config = ConnectionConfig::new("192.168.1.40").credentials("customer", "hunter2");
/// let manager = Manager::new(config, Print)?;
/// manager.start().await?;
/// # Ok(())
/// # }
/// ```
///
/// Dropping every clone of the handle stops the connection and ends the driver task.
#[derive(Debug, Clone)]
pub struct Manager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
}

impl Manager {
    /// Validates `config` and spawns the driver, idle until [`start`][Self::start].
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid settings and [`Error::Transport`] if the HTTP
    /// client can't be built.
    pub fn new<H: LiveHandler>(config: ConnectionConfig, handler: H) -> Result<Self> {
        Self::builder(config, handler).build()
    }

    pub fn builder<H: LiveHandler>(config: ConnectionConfig, handler: H) -> ManagerBuilder<H> {
        ManagerBuilder {
            config,
            handler,
            resolver: None,
            client: None,
        }
    }

    /// Connects with a fresh reconnect budget, tearing down any existing connection first.
    /// Returns once the driver has
    /// moved to [`ConnectionState::Connecting`], not once the stream is up; watch
    /// [`subscribe`][Self::subscribe] or [`LiveHandler::on_connect`] for that.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Closes the connection and cancels any pending reconnect.
    /// [`LiveHandler::on_disconnect`] fires once, unless already stopped.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Replaces the settings.
    ///
    /// An address adopted from the resolver is kept as long as `config` carries the same host
    /// and port as the previous settings. A change to host, port, TLS or credentials drops the cached auth, resets the reconnect
    /// counter and, if the manager has been started and not stopped, reconnects. Other
    /// changes apply from the next connection attempt without disturbing the current one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] and keeps the old settings if `config` is invalid.
    pub async fn update_settings(&self, config: ConnectionConfig) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::UpdateSettings(Box::new(config), tx))
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Gives a manager that has used up its attempts a fresh budget. Does not connect.
    pub async fn reset_reconnect_counter(&self) -> Result<()> {
        self.request(Command::ResetReconnectCounter).await
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    /// A receiver that is notified whenever the status changes
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Optional collaborators for a [`Manager`]
#[must_use]
pub struct ManagerBuilder<H> {
    config: ConnectionConfig,
    handler: H,
    resolver: Option<Arc<dyn AddressResolver>>,
    client: Option<Client>,
}

impl<H: LiveHandler> ManagerBuilder<H> {
    /// Consulted before each reconnect attempt when the config carries a `device_id`
    pub fn resolver(mut self, resolver: impl AddressResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Use a preconfigured client (proxy, custom roots, ...). It must not carry a total
    /// request timeout, since the live response never completes.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// See [`Manager::new`]
    pub fn build(self) -> Result<Manager> {
        self.config.validate()?;
        let client = match self.client {
            Some(client) => client,
            None => Client::builder().build()?,
        };

        let backoff = Backoff::new(self.config.reconnect);
        let (status_tx, status_rx) = watch::channel(Status::new(
            ConnectionState::Idle,
            0,
            self.config.live_url(),
        ));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let driver = Driver {
            config: self.config,
            handler: self.handler,
            resolver: self.resolver,
            client,
            state: ConnectionState::Idle,
            backoff,
            requester: None,
            started: false,
            resolved: None,
            status: status_tx,
        };
        tokio::spawn(driver.run(cmd_rx));

        Ok(Manager {
            commands: cmd_tx,
            status: status_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// What the driver does next
#[derive(Debug)]
enum Phase {
    /// Wait for commands only
    Idle,
    /// State is already `Connecting`, open the stream
    Connect,
    Backoff(Duration),
    Shutdown,
}

struct Driver<H> {
    config: ConnectionConfig,
    handler: H,
    resolver: Option<Arc<dyn AddressResolver>>,
    client: Client,
    state: ConnectionState,
    backoff: Backoff,
    /// Resolved on first connect, reused until identity changes or the device rejects it
    requester: Option<Arc<dyn Requester>>,
    /// Set by the first `start()`, so settings changes don't connect a never-started manager
    started: bool,
    /// Address the resolver moved the device to. Overrides the configured host and port until
    /// the caller configures a different one.
    resolved: Option<(String, u16)>,
    status: watch::Sender<Status>,
}

impl<H: LiveHandler> Driver<H> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle(&mut commands).await,
                Phase::Connect => self.connect(&mut commands).await,
                Phase::Backoff(delay) => self.backoff(delay, &mut commands).await,
                Phase::Shutdown => break,
            };
        }
        debug!(url = %self.live_url(), "connection driver shut down");
    }

    async fn idle(&mut self, commands: &mut mpsc::Receiver<Command>) -> Phase {
        loop {
            let command = commands.recv().await;
            if let Some(next) = self.handle_command(command) {
                return next;
            }
        }
    }

    async fn connect(&mut self, commands: &mut mpsc::Receiver<Command>) -> Phase {
        info!(url = %self.live_url(), attempt = self.backoff.attempts(), "connecting");

        let handshake = handshake(self.client.clone(), self.target(), self.requester.clone());
        tokio::pin!(handshake);

        let (requester, outcome) = loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    // dropping the handshake aborts the request
                    if let Some(next) = self.handle_command(command) {
                        return next;
                    }
                }
                result = &mut handshake => break result,
            }
        };
        self.requester = requester;

        match outcome.and_then(|response| ByteSource::from(response).into_text()) {
            Ok(text) => {
                self.transition(ConnectionState::Connected);
                self.backoff.reset();
                self.publish();
                info!(url = %self.live_url(), "live stream established");
                self.handler.on_connect();
                self.stream(text, commands).await
            }
            Err(err) if !err.is_retriable() => {
                if err.is_auth_err() {
                    self.requester = None;
                }
                self.transition(ConnectionState::Idle);
                error!(url = %self.live_url(), error = %err, "not reconnecting");
                self.handler.on_error(&err);
                Phase::Idle
            }
            Err(err) => self.fault(err, false),
        }
    }

    async fn stream(&mut self, mut text: TextStream, commands: &mut mpsc::Receiver<Command>) -> Phase {
        let mut parser = FrameParser::new();
        let mut heartbeat =
            Heartbeat::start(self.config.heartbeat_timeout, self.config.heartbeat_interval);
        let read_timeout = self.config.read_timeout;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Some(next) = self.handle_command(command) {
                        return next;
                    }
                }
                elapsed = heartbeat.expired() => {
                    return self.fault(Error::Stale { elapsed }, true);
                }
                chunk = next_chunk(&mut text, read_timeout) => match chunk {
                    Some(Ok(chunk)) => {
                        for frame in parser.feed(&chunk) {
                            self.dispatch(&frame, &mut heartbeat);
                        }
                    }
                    Some(Err(err)) => return self.fault(err, true),
                    None => return self.fault(Error::StreamEnded, true),
                },
            }
        }
    }

    async fn backoff(&mut self, delay: Duration, commands: &mut mpsc::Receiver<Command>) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Some(next) = self.handle_command(command) {
                        return next;
                    }
                }
                _ = &mut sleep => break,
            }
        }

        if let Some(next) = self.refresh_address(commands).await {
            return next;
        }
        self.begin_connect();
        Phase::Connect
    }

    /// Asks the resolver, if any, where the device is now. Only a successful lookup that
    /// reports a move changes anything.
    async fn refresh_address(&mut self, commands: &mut mpsc::Receiver<Command>) -> Option<Phase> {
        let (Some(resolver), Some(device_id)) = (self.resolver.clone(), self.config.device_id.clone())
        else {
            return None;
        };

        let lookup = async move { resolver.resolve(&device_id).await };
        tokio::pin!(lookup);

        let resolution = loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Some(next) = self.handle_command(command) {
                        return Some(next);
                    }
                }
                resolution = &mut lookup => break resolution,
            }
        };

        match resolution {
            Ok(resolution) => match resolution.moved_to() {
                Some((host, port)) if self.address() != (host, port) => {
                    info!(
                        from = %self.target().base_url(),
                        host,
                        port,
                        "device moved, adopting new address"
                    );
                    let configured = (self.config.host.as_str(), self.config.port) == (host, port);
                    self.resolved = (!configured).then(|| (host.to_owned(), port));
                    self.requester = None;
                    self.publish();
                }
                _ => debug!(success = resolution.success, "device address unchanged"),
            },
            Err(err) => warn!(error = %err, "address lookup failed, keeping last known address"),
        }
        None
    }

    /// Applies one command. `Some` means the current phase is over.
    fn handle_command(&mut self, command: Option<Command>) -> Option<Phase> {
        let Some(command) = command else {
            debug!("all manager handles dropped");
            if self.state.is_active() {
                self.transition(ConnectionState::Stopped);
                self.handler.on_disconnect();
            }
            return Some(Phase::Shutdown);
        };

        match command {
            Command::Start(ack) => {
                self.started = true;
                self.backoff.reset();
                self.restart();
                let _ = ack.send(());
                Some(Phase::Connect)
            }
            Command::Stop(ack) => {
                let next = self.stop();
                let _ = ack.send(());
                next
            }
            Command::UpdateSettings(config, ack) => {
                if let Err(err) = config.validate() {
                    let _ = ack.send(Err(err));
                    return None;
                }
                let next = self.apply_settings(*config);
                let _ = ack.send(Ok(()));
                next
            }
            Command::ResetReconnectCounter(ack) => {
                self.backoff.reset();
                self.publish();
                debug!("reconnect counter reset");
                let _ = ack.send(());
                None
            }
        }
    }

    fn stop(&mut self) -> Option<Phase> {
        if self.state == ConnectionState::Stopped {
            debug!("stop requested while already stopped");
            return Some(Phase::Idle);
        }
        info!(url = %self.live_url(), state = %self.state, "stopping");
        self.transition(ConnectionState::Stopped);
        self.handler.on_disconnect();
        Some(Phase::Idle)
    }

    /// Drops whatever is in flight and moves to `Connecting`
    fn restart(&mut self) {
        if self.state.is_connected() {
            self.transition(ConnectionState::Stopped);
            self.handler.on_disconnect();
        }
        self.begin_connect();
    }

    fn apply_settings(&mut self, config: ConnectionConfig) -> Option<Phase> {
        let identity_changed = self.config.requires_restart(&config);
        // a resolved address outlives updates that keep the caller's host and port
        if self.config.host != config.host || self.config.port != config.port {
            self.resolved = None;
        }
        if self.config.auth != config.auth {
            self.requester = None;
        }
        self.backoff.set_policy(config.reconnect);
        self.config = config;

        if !identity_changed {
            debug!("settings updated in place");
            self.publish();
            return None;
        }

        self.requester = None;
        self.backoff.reset();
        self.publish();

        if self.started && self.state != ConnectionState::Stopped {
            info!(url = %self.live_url(), "connection settings changed, reconnecting");
            self.restart();
            Some(Phase::Connect)
        } else {
            debug!(url = %self.live_url(), "connection settings changed");
            None
        }
    }

    /// Host and port we actually connect to
    fn address(&self) -> (&str, u16) {
        match &self.resolved {
            Some((host, port)) => (host.as_str(), *port),
            None => (self.config.host.as_str(), self.config.port),
        }
    }

    /// The configured settings with any resolved address applied
    fn target(&self) -> ConnectionConfig {
        let mut target = self.config.clone();
        if let Some((host, port)) = &self.resolved {
            target.host.clone_from(host);
            target.port = *port;
        }
        target
    }

    fn live_url(&self) -> String {
        self.target().live_url()
    }

    fn begin_connect(&mut self) {
        self.transition(ConnectionState::Connecting);
    }

    /// Reports a fault, then either schedules the next attempt or gives up
    fn fault(&mut self, err: Error, was_connected: bool) -> Phase {
        self.transition(ConnectionState::Erroring);
        if was_connected {
            warn!(url = %self.live_url(), error = %err, "live stream lost");
        } else {
            error!(url = %self.live_url(), error = %err, "connection failed");
        }
        self.handler.on_error(&err);
        if was_connected {
            self.handler.on_disconnect();
        }
        self.schedule_reconnect()
    }

    fn schedule_reconnect(&mut self) -> Phase {
        match self.backoff.next_delay() {
            Some(delay) => {
                self.transition(ConnectionState::ReconnectScheduled);
                warn!(
                    attempt = self.backoff.attempts(),
                    max_attempts = self.backoff.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                Phase::Backoff(delay)
            }
            None => {
                let attempts = self.backoff.attempts();
                self.transition(ConnectionState::Idle);
                error!(attempts, "reconnect attempts exhausted, giving up");
                self.handler.on_error(&Error::Exhausted { attempts });
                self.handler.on_give_up(attempts);
                Phase::Idle
            }
        }
    }

    fn dispatch(&self, frame: &Frame, heartbeat: &mut Heartbeat) {
        if !frame.is_live() {
            trace!(event = %frame.event, "ignoring frame");
            return;
        }

        let de = &mut serde_json::Deserializer::from_str(&frame.data);
        match serde_path_to_error::deserialize::<_, H::Payload>(de) {
            Ok(payload) => {
                heartbeat.touch();
                self.handler.on_data(payload);
            }
            Err(err) => {
                let path = err.path().clone();
                let err = Error::protocol(&frame.event, err.into_inner().to_string());
                warn!(error = %err, path = %path, "skipping undecodable frame");
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            error!(from = %self.state, to = %next, "refusing state transition");
            return;
        }
        trace!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(Status::new(
            self.state,
            self.backoff.attempts(),
            self.live_url(),
        ));
    }
}

/// Resolves auth if needed, then opens the live stream. Owns everything it touches so it
/// can race the command channel.
async fn handshake(
    client: Client,
    config: ConnectionConfig,
    cached: Option<Arc<dyn Requester>>,
) -> (Option<Arc<dyn Requester>>, Result<reqwest::Response>) {
    let requester = match cached {
        Some(requester) => requester,
        None => match resolve_requester(&client, &config).await {
            Ok(requester) => requester,
            Err(err) => return (None, Err(err)),
        },
    };
    let result = open_live(&client, &config, requester.as_ref()).await;
    (Some(requester), result)
}

async fn resolve_requester(client: &Client, config: &ConnectionConfig) -> Result<Arc<dyn Requester>> {
    let Some(password) = config.password.as_deref().filter(|_| config.has_password()) else {
        return Ok(Arc::new(Unauthenticated));
    };

    let scheme = match config.auth {
        AuthPreference::Basic => AuthScheme::Basic,
        AuthPreference::Digest => AuthScheme::Digest,
        AuthPreference::Auto => {
            detect_scheme(client, &config.base_url(), config.connect_timeout).await?
        }
    };
    debug!(scheme = %scheme, username = %config.username, "auth resolved");
    Ok(request_factory(&config.username, password, scheme))
}

async fn open_live(
    client: &Client,
    config: &ConnectionConfig,
    requester: &dyn Requester,
) -> Result<reqwest::Response> {
    let request = client
        .get(config.live_url())
        .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
        .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header(CONNECTION, HeaderValue::from_static("keep-alive"))
        .build()?;

    let response = timeout(config.connect_timeout, requester.send(client, request))
        .await
        .map_err(|_| Error::timeout(config.connect_timeout))??;

    match response.status() {
        StatusCode::UNAUTHORIZED => Err(Error::Authentication {
            status: StatusCode::UNAUTHORIZED,
        }),
        status if status.is_success() => Ok(response),
        status => Err(Error::Status { status }),
    }
}

async fn next_chunk(text: &mut TextStream, read_timeout: Option<Duration>) -> Option<Result<Str>> {
    match read_timeout {
        Some(limit) => timeout(limit, text.next())
            .await
            .unwrap_or_else(|_| Some(Err(Error::timeout(limit)))),
        None => text.next().await,
    }
}
