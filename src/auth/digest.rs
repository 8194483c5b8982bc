//! HTTP Digest authentication (RFC 7616, with the RFC 2617 no-qop fallback).
//!
//! The first request goes out bare; the 401 challenge it earns is cached and
//! every later request is pre-authorised with the cached nonce and a growing
//! nonce count. When the device rotates its nonce (a `stale=true` challenge,
//! or simply a new nonce) the cache is replaced and the request sent once more.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::{
    Client, Method, Request, Response, StatusCode, Url,
    header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE},
};
use sha2::Sha256;
use tracing::{debug, trace};

use super::{AuthScheme, Requester};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn parse(value: &str) -> Option<Self> {
        [
            ("MD5", Algorithm::Md5),
            ("MD5-sess", Algorithm::Md5Sess),
            ("SHA-256", Algorithm::Sha256),
            ("SHA-256-sess", Algorithm::Sha256Sess),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, algorithm)| algorithm)
    }

    fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }

    fn hash(self, input: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => format!("{:x}", Md5::digest(input.as_bytes())),
            Algorithm::Sha256 | Algorithm::Sha256Sess => {
                format!("{:x}", Sha256::digest(input.as_bytes()))
            }
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    /// The server offered `qop=auth`; [false] means the legacy RFC 2069 computation
    pub qop_auth: bool,
    pub stale: bool,
}

impl Challenge {
    /// Parses a challenge, returning [None] if it isn't Digest, has no nonce, or asks for
    /// something we can't answer (an unknown algorithm, or `auth-int` only)
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim_start();
        let (scheme, params) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = String::new();
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = Algorithm::Md5;
        let mut qop = None;
        let mut stale = false;

        for (key, value) in parse_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = value,
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Algorithm::parse(&value)?,
                "qop" => qop = Some(value),
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => (),
            }
        }

        let qop_auth = match qop {
            Some(qop) => {
                if !qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                    return None;
                }
                true
            }
            None => false,
        };

        Some(Self {
            realm,
            nonce: nonce?,
            opaque,
            algorithm,
            qop_auth,
            stale,
        })
    }

    /// Builds the `Authorization` header value answering this challenge
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &Method,
        uri: &str,
        nc: u32,
        cnonce: &str,
    ) -> String {
        let algorithm = self.algorithm;
        let nc = format!("{nc:08x}");

        let mut ha1 = algorithm.hash(&format!("{username}:{}:{password}", self.realm));
        if algorithm.is_session() {
            ha1 = algorithm.hash(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = algorithm.hash(&format!("{}:{uri}", method.as_str()));

        let response = if self.qop_auth {
            algorithm.hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            algorithm.hash(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{response}\"",
            quote(username),
            quote(&self.realm),
            quote(&self.nonce),
            quote(uri),
            algorithm.name(),
        );
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        if self.qop_auth {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{}\"", quote(cnonce)));
        }
        header
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Splits `key=value, key="quoted, value"` auth-params
fn parse_params(input: &str) -> Vec<(&str, String)> {
    let mut params = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut value = String::new();
            let mut end = quoted.len();
            let mut escaped = false;
            for (i, c) in quoted.char_indices() {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = i + 1;
                    break;
                } else {
                    value.push(c);
                }
            }
            rest = &quoted[end..];
            value
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].trim().to_owned();
            rest = &rest[end..];
            value
        };

        params.push((key, value));
    }

    params
}

/// The request-target as it goes in the `uri` parameter
fn digest_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    }
}

fn client_nonce() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn digest_challenge(response: &Response) -> Option<Challenge> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(Challenge::parse)
}

#[derive(Debug)]
struct Session {
    challenge: Challenge,
    nc: u32,
}

/// [`Requester`] that answers Digest challenges, caching the nonce between requests
pub struct DigestAuth {
    username: String,
    password: String,
    session: Mutex<Option<Session>>,
}

impl fmt::Debug for DigestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl DigestAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            session: Mutex::new(None),
        }
    }

    /// Adds an `Authorization` header from the cached challenge, if there is one
    fn authorize(&self, request: &mut Request) -> bool {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = session.as_mut() else {
            return false;
        };
        session.nc = session.nc.wrapping_add(1);

        let header = session.challenge.authorization(
            &self.username,
            &self.password,
            request.method(),
            &digest_uri(request.url()),
            session.nc,
            &client_nonce(),
        );
        match HeaderValue::from_str(&header) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
                true
            }
            Err(_) => false,
        }
    }

    fn cached_nonce_is(&self, nonce: &str) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|session| session.challenge.nonce == nonce)
    }

    fn store(&self, challenge: Challenge) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Session { challenge, nc: 0 });
    }
}

#[async_trait]
impl Requester for DigestAuth {
    async fn send(&self, client: &Client, mut request: Request) -> reqwest::Result<Response> {
        let retry = request.try_clone();
        let preauthorised = self.authorize(&mut request);
        let response = client.execute(request).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let (Some(challenge), Some(mut retry)) = (digest_challenge(&response), retry) else {
            return Ok(response);
        };
        // the nonce we just used was fine, so the credentials are what got rejected
        if preauthorised && !challenge.stale && self.cached_nonce_is(&challenge.nonce) {
            debug!("digest credentials rejected");
            return Ok(response);
        }

        trace!(realm = %challenge.realm, stale = challenge.stale, "answering digest challenge");
        self.store(challenge);
        self.authorize(&mut retry);
        client.execute(retry).await
    }

    fn scheme(&self) -> AuthScheme {
        AuthScheme::Digest
    }
}
