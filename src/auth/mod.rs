//! Authentication against the device.
//!
//! The device may want no credentials at all, HTTP Basic or HTTP Digest, and
//! nothing tells us which up front. [`detect_scheme`] asks the device once;
//! [`request_factory`] then turns the answer into a [`Requester`] that issues
//! requests with the right credentials attached.

mod detect;
pub mod digest;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::{Client, Request, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

pub use detect::detect_scheme;
pub use digest::DigestAuth;

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPreference {
    /// Probe the device and use whatever it challenges with
    #[default]
    Auto,
    Digest,
    Basic,
}

/// What the device actually wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    None,
    Basic,
    Digest,
}

impl AuthScheme {
    /// Reads the scheme out of a `WWW-Authenticate` value. Only the first token counts and
    /// anything unrecognised, including no header at all, is treated as Digest.
    pub fn from_challenge(header: Option<&str>) -> Self {
        let token = header
            .and_then(|value| value.split_whitespace().next())
            .map(|token| token.trim_end_matches(','));

        match token {
            Some(token) if token.eq_ignore_ascii_case("basic") => AuthScheme::Basic,
            _ => AuthScheme::Digest,
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::None => "none".fmt(f),
            AuthScheme::Basic => "basic".fmt(f),
            AuthScheme::Digest => "digest".fmt(f),
        }
    }
}

/// The "issue a request" calling convention shared by every scheme
#[async_trait]
pub trait Requester: Send + Sync + fmt::Debug {
    /// Sends `request`, attaching whatever credentials the scheme needs. A 401 that survives
    /// the scheme's own challenge handling is returned as a normal response.
    async fn send(&self, client: &Client, request: Request) -> reqwest::Result<Response>;

    fn scheme(&self) -> AuthScheme;
}

/// Sends requests as they are
#[derive(Debug, Clone, Copy, Default)]
pub struct Unauthenticated;

#[async_trait]
impl Requester for Unauthenticated {
    async fn send(&self, client: &Client, request: Request) -> reqwest::Result<Response> {
        client.execute(request).await
    }

    fn scheme(&self) -> AuthScheme {
        AuthScheme::None
    }
}

/// Attaches Basic credentials to every request without waiting for a challenge
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Requester for BasicAuth {
    async fn send(&self, client: &Client, request: Request) -> reqwest::Result<Response> {
        RequestBuilder::from_parts(client.clone(), request)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
    }

    fn scheme(&self) -> AuthScheme {
        AuthScheme::Basic
    }
}

/// Builds the [`Requester`] for a resolved scheme
pub fn request_factory(username: &str, password: &str, scheme: AuthScheme) -> Arc<dyn Requester> {
    match scheme {
        AuthScheme::None => Arc::new(Unauthenticated),
        AuthScheme::Basic => Arc::new(BasicAuth::new(username, password)),
        AuthScheme::Digest => Arc::new(DigestAuth::new(username, password)),
    }
}
