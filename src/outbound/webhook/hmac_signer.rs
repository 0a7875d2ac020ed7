use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use time::OffsetDateTime;
use zeroize::Zeroizing;

use super::key_stretch::{HMAC_BLOCK_LENGTH, stretch_key};
use super::schemas::SignedEnvelope;

type HmacSha256 = Hmac<Sha256>;

/// Per-channel signing secret. Zeroized on drop and redacted from `Debug`.
#[derive(Clone)]
pub struct ChannelSecret(Zeroizing<Vec<u8>>);

impl ChannelSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ChannelSecret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for ChannelSecret {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for ChannelSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Format a signing time as the minute-resolution key component `YYYYMMDDhhmm`.
pub fn signing_timestamp(time: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}",
        time.year(),
        u8::from(time.month()),
        time.day(),
        time.hour(),
        time.minute()
    )
}

/// HMAC-SHA256 signer for webhook messages keyed by a time-bound stretched key
pub struct HmacSigner {
    secret: ChannelSecret,
}

impl HmacSigner {
    pub fn new(secret: ChannelSecret) -> Self {
        Self { secret }
    }

    /// Sign `payload` with the key derived for `signing_time`.
    pub fn sign(&self, payload: &[u8], signing_time: OffsetDateTime) -> SignedEnvelope {
        let timestamp = signing_timestamp(signing_time);
        let hash = self.sign_with_timestamp(payload, &timestamp);
        SignedEnvelope::new(payload, &hash)
    }

    /// Compute the raw digest for an already formatted signing timestamp.
    pub fn sign_with_timestamp(&self, payload: &[u8], timestamp: &str) -> Vec<u8> {
        // `key` is scrubbed as soon as it goes out of scope
        let key = stretch_key(self.secret.as_bytes(), timestamp, HMAC_BLOCK_LENGTH);
        hmac_sha256(&key, payload)
    }

    /// Check a digest received alongside `payload` in constant time.
    pub fn verify(&self, payload: &[u8], hash: &[u8], timestamp: &str) -> bool {
        let key = stretch_key(self.secret.as_bytes(), timestamp, HMAC_BLOCK_LENGTH);
        let mut mac = new_mac(&key);
        mac.update(payload);
        mac.verify_slice(hash).is_ok()
    }
}

/// Build the signed probe sent to the trusted time source.
///
/// The signed bytes are the decimal rendering of `local_millis`.
pub fn sign_time_probe(timestamp_secret: &[u8], local_millis: i64) -> SignedEnvelope {
    let data = local_millis.to_string();
    let hash = hmac_sha256(timestamp_secret, data.as_bytes());
    SignedEnvelope::new(data.as_bytes(), &hash)
}

/// Compute HMAC-SHA256
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(key);
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
    }
}
