use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, Url, redirect};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ports::{DeliveryError, WebhookTransport};

/// Default bound on a whole exchange, connection included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_REDIRECTS: usize = 10;

/// Largest response body accepted from a receiver.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Error type for HTTP client construction
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::TransportFailure(format!("request timed out: {err}"))
        } else {
            DeliveryError::TransportFailure(err.to_string())
        }
    }
}

/// Identifying user agent sent with every request.
pub fn default_user_agent() -> String {
    format!("SignedWebhook/{}", env!("CARGO_PKG_VERSION"))
}

/// `reqwest`-backed transport for signed envelopes
#[derive(Debug, Clone)]
pub struct WebhookHttpClient {
    client: Client,
    timeout: Duration,
}

impl WebhookHttpClient {
    /// Create a client with the default timeout that only speaks HTTPS
    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_settings(DEFAULT_TIMEOUT, &default_user_agent(), true)
    }

    /// Create a client with explicit settings.
    ///
    /// `https_only = false` is meant for local receivers in tests; redirects from
    /// HTTPS to plain HTTP are refused either way.
    pub fn with_settings(
        timeout: Duration,
        user_agent: &str,
        https_only: bool,
    ) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .https_only(https_only)
            .redirect(no_downgrade_policy())
            .build()
            .map_err(|e| HttpClientError::Build(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Get configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the response body, refusing anything over `MAX_BODY_SIZE`.
    async fn read_response_body(mut response: Response) -> Result<Vec<u8>, DeliveryError> {
        if let Some(length) = response.content_length() {
            if length > MAX_BODY_SIZE as u64 {
                return Err(body_too_large(length));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            DeliveryError::TransportFailure(format!("Failed to read response body: {e}"))
        })? {
            if body.len() + chunk.len() > MAX_BODY_SIZE {
                return Err(body_too_large((body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

fn body_too_large(size: u64) -> DeliveryError {
    warn!(size = size, max_size = MAX_BODY_SIZE, "Response body too large");
    DeliveryError::ProtocolError(format!("response body exceeds {MAX_BODY_SIZE} bytes"))
}

#[async_trait]
impl WebhookTransport for WebhookHttpClient {
    async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<Vec<u8>, DeliveryError> {
        debug!(url = %url, size = body.len(), "Posting signed envelope");

        let start = Instant::now();

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Webhook request failed");
                DeliveryError::from(e)
            })?;

        let status = response.status();
        let response_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            url = %url,
            status = %status.as_u16(),
            response_time_ms = %response_time_ms,
            "Webhook response received"
        );

        if !status.is_success() {
            return Err(DeliveryError::from_status(status.as_u16()));
        }

        Self::read_response_body(response).await
    }
}

/// Follow redirects, but never from HTTPS to a less secure scheme.
fn no_downgrade_policy() -> redirect::Policy {
    redirect::Policy::custom(|attempt| {
        match check_redirect(attempt.previous(), attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

/// Decide whether a redirect to `next` may be followed after `previous` hops.
fn check_redirect(previous: &[Url], next: &Url) -> Result<(), &'static str> {
    if previous.len() >= MAX_REDIRECTS {
        return Err("too many redirects");
    }
    if is_downgrade(previous.last(), next) {
        return Err("refusing redirect from HTTPS to a less secure scheme");
    }
    Ok(())
}

fn is_downgrade(previous: Option<&Url>, next: &Url) -> bool {
    previous.is_some_and(|previous| previous.scheme() == "https") && next.scheme() != "https"
}
