use std::time::Duration;

use reqwest::{Client, StatusCode, header::WWW_AUTHENTICATE};
use tracing::debug;

use super::AuthScheme;
use crate::{
    constants::PROBE_PATH,
    errors::{Error, Result},
};

/// Probes `base_url` once, unauthenticated, to learn which scheme the device wants.
///
/// 2xx means no auth. A 401 is decided by its `WWW-Authenticate` challenge. Any other status
/// tells us nothing, so we fall back to Digest like the device firmware does. Not retried, and
/// nothing is cached here.
///
/// # Errors
///
/// Returns [`Error::Transport`] or [`Error::Timeout`] if the device can't be reached.
pub async fn detect_scheme(client: &Client, base_url: &str, timeout: Duration) -> Result<AuthScheme> {
    let url = format!("{base_url}{PROBE_PATH}");
    let response = tokio::time::timeout(timeout, client.get(&url).send())
        .await
        .map_err(|_| Error::timeout(timeout))??;

    let status = response.status();
    let scheme = if status.is_success() {
        AuthScheme::None
    } else if status == StatusCode::UNAUTHORIZED {
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok());
        AuthScheme::from_challenge(challenge)
    } else {
        AuthScheme::Digest
    };

    debug!(url = %url, status = %status, scheme = %scheme, "auth scheme probed");
    Ok(scheme)
}
