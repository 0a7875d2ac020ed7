use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::hmac_signer::sign_time_probe;
use crate::domain::ports::{DeliveryError, SystemTimeSource, TimeSource, WebhookTransport};

/// Process-wide estimate of the offset between local time and a trusted time source.
///
/// One instance is shared (behind an `Arc`) by every delivery engine. The offset is
/// the only mutable state and is read and written atomically, so concurrent
/// refreshes simply race and the last writer wins.
pub struct ClockSyncService {
    timestamp_secret: Zeroizing<Vec<u8>>,

    timestamp_url: Option<Url>,

    offset_millis: AtomicI64,

    time_source: Arc<dyn TimeSource>,
}

impl ClockSyncService {
    pub fn new(timestamp_secret: Vec<u8>, timestamp_url: Option<Url>) -> Self {
        Self {
            timestamp_secret: Zeroizing::new(timestamp_secret),
            timestamp_url,
            offset_millis: AtomicI64::new(0),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Replace the local clock, mainly for deterministic tests.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Start from a fixed offset instead of zero.
    pub fn with_offset_millis(self, offset_millis: i64) -> Self {
        self.set_offset_millis(offset_millis);
        self
    }

    pub fn timestamp_url(&self) -> Option<&Url> {
        self.timestamp_url.as_ref()
    }

    pub fn offset_millis(&self) -> i64 {
        self.offset_millis.load(Ordering::Acquire)
    }

    /// Override the measured offset.
    pub fn set_offset_millis(&self, offset_millis: i64) {
        self.offset_millis.store(offset_millis, Ordering::Release);
    }

    pub fn now_utc(&self) -> OffsetDateTime {
        self.time_source.now_utc()
    }

    /// Local time in milliseconds since the Unix epoch.
    pub fn local_millis(&self) -> i64 {
        (self.now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }

    /// Local time corrected by the current offset.
    pub fn signing_time(&self) -> OffsetDateTime {
        let now = self.now_utc();
        now.checked_add(Duration::milliseconds(self.offset_millis()))
            .unwrap_or(now)
    }

    /// Measure the offset with one signed round trip and store it on success.
    pub async fn refresh_offset(
        &self,
        transport: &dyn WebhookTransport,
    ) -> Result<i64, DeliveryError> {
        let offset = self.measure_offset(transport).await?;
        self.set_offset_millis(offset);
        info!(offset_millis = offset, "Clock offset updated");
        Ok(offset)
    }

    /// Measure the offset with one signed round trip without storing it.
    pub async fn measure_offset(
        &self,
        transport: &dyn WebhookTransport,
    ) -> Result<i64, DeliveryError> {
        let url = self.timestamp_url.as_ref().ok_or_else(|| {
            DeliveryError::Configuration("trusted time URL is not configured".to_string())
        })?;

        let local_millis = self.local_millis();
        let body = sign_time_probe(&self.timestamp_secret, local_millis)
            .to_json()
            .map_err(|e| DeliveryError::ProtocolError(e.to_string()))?;

        debug!(url = %url, local_millis = local_millis, "Requesting clock offset");

        let response = transport.post_json(url, body).await?;
        let offset = parse_offset(&response).inspect_err(|e| {
            warn!(url = %url, error = %e, "Time source returned an unusable offset");
        })?;

        debug!(offset_millis = offset, "Clock offset measured");
        Ok(offset)
    }
}

impl fmt::Debug for ClockSyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockSyncService")
            .field("timestamp_url", &self.timestamp_url)
            .field("offset_millis", &self.offset_millis())
            .finish_non_exhaustive()
    }
}

/// Parse a time-source reply: a signed decimal number of milliseconds.
pub fn parse_offset(body: &[u8]) -> Result<i64, DeliveryError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| DeliveryError::ProtocolError("offset is not valid UTF-8".to_string()))?;

    text.trim()
        .parse::<i64>()
        .map_err(|e| DeliveryError::ProtocolError(format!("invalid offset {text:?}: {e}")))
}
