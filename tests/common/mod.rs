//! Mock device and recording handler shared by the integration tests.

#![allow(dead_code)]

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream};
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::{
    Request, Response,
    body::{Bytes, Frame, Incoming},
    header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use livefeed::{
    ConnectionConfig, Error, LiveHandler,
    constants::{LIVE_PATH, PROBE_PATH},
};
use tokio::{net::TcpListener, time::timeout};

// ---------------------------------------------------------------------------
// Mock device
// ---------------------------------------------------------------------------

/// A request as the mock device saw it
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub authorization: Option<String>,
}

impl Seen {
    pub fn is_live(&self) -> bool {
        self.path == LIVE_PATH
    }

    pub fn is_probe(&self) -> bool {
        self.path == PROBE_PATH
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 `text/event-stream`: sends the chunks, then holds the connection open
    Stream(Vec<&'static str>),
    /// 200 with a fixed body, closed once sent
    Body(&'static str),
    Status(u16),
    /// 401 carrying this `WWW-Authenticate` value
    Challenge(&'static str),
    /// Accepts the request and never answers
    Hang,
}

type Body = UnsyncBoxBody<Bytes, Infallible>;

impl Reply {
    fn into_response(self) -> Response<Body> {
        let builder = Response::builder();
        let response = match self {
            Reply::Stream(chunks) => {
                let frames = stream::iter(chunks)
                    .map(|chunk| Ok::<_, Infallible>(Frame::data(Bytes::from_static(chunk.as_bytes()))))
                    .chain(stream::pending());
                builder
                    .header(CONTENT_TYPE, "text/event-stream")
                    .body(StreamBody::new(frames).boxed_unsync())
            }
            Reply::Body(body) => builder
                .header(CONTENT_TYPE, "text/event-stream")
                .body(Full::new(Bytes::from_static(body.as_bytes())).boxed_unsync()),
            Reply::Status(status) => builder
                .status(status)
                .body(Full::new(Bytes::new()).boxed_unsync()),
            Reply::Challenge(challenge) => builder
                .status(401)
                .header(WWW_AUTHENTICATE, challenge)
                .body(Full::new(Bytes::new()).boxed_unsync()),
            Reply::Hang => builder.body(Full::new(Bytes::new()).boxed_unsync()),
        };
        response.expect("build response")
    }
}

/// HTTP server on 127.0.0.1 that answers every request through `route` and keeps a log
pub struct MockDevice {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl MockDevice {
    pub async fn start<F>(route: F) -> Self
    where
        F: Fn(&Seen) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock device");
        let addr = listener.local_addr().expect("local addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let route = Arc::new(route);

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let route = Arc::clone(&route);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let request = Seen {
                            path: req.uri().path().to_owned(),
                            authorization: req
                                .headers()
                                .get(AUTHORIZATION)
                                .and_then(|value| value.to_str().ok())
                                .map(str::to_owned),
                        };
                        let reply = route(&request);
                        log.lock().unwrap().push(request);
                        async move {
                            if matches!(reply, Reply::Hang) {
                                std::future::pending::<()>().await;
                            }
                            Ok::<_, Infallible>(reply.into_response())
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, seen }
    }

    /// Device that streams `chunks` on the live endpoint and needs no auth
    pub async fn streaming(chunks: Vec<&'static str>) -> Self {
        Self::start(move |_| Reply::Stream(chunks.clone())).await
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.ip().to_string())
            .port(self.addr.port())
            .connect_timeout(Duration::from_secs(2))
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn live_requests(&self) -> Vec<Seen> {
        self.requests().into_iter().filter(Seen::is_live).collect()
    }
}

// ---------------------------------------------------------------------------
// Recording handler
// ---------------------------------------------------------------------------

/// Short, stable name for an error variant
pub fn kind(error: &Error) -> &'static str {
    match error {
        Error::Authentication { .. } => "auth",
        Error::Transport(_) => "transport",
        Error::Io(_) => "io",
        Error::Timeout { .. } => "timeout",
        Error::Status { .. } => "status",
        Error::StreamEnded => "ended",
        Error::EmptyBody => "empty",
        Error::Utf8(_) => "utf8",
        Error::Stale { .. } => "stale",
        Error::Protocol { .. } => "protocol",
        Error::Exhausted { .. } => "exhausted",
        Error::Config { .. } => "config",
        Error::Closed => "closed",
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    data: Mutex<Vec<serde_json::Value>>,
    errors: Mutex<Vec<&'static str>>,
    give_ups: Mutex<Vec<u32>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn data(&self) -> Vec<serde_json::Value> {
        self.data.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<&'static str> {
        self.errors.lock().unwrap().clone()
    }

    pub fn give_ups(&self) -> Vec<u32> {
        self.give_ups.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl LiveHandler for Recorder {
    type Payload = serde_json::Value;

    fn on_data(&self, payload: serde_json::Value) {
        self.data.lock().unwrap().push(payload);
    }

    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &Error) {
        self.errors.lock().unwrap().push(kind(error));
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_give_up(&self, attempts: u32) {
        self.give_ups.lock().unwrap().push(attempts);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Polls `check` until it holds, panicking after a few seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Lets the driver run for a while, for asserting that something does *not* happen
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
