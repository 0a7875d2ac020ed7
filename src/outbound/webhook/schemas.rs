use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Request body for both message deliveries and time-sync probes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// Base64 of the signed bytes
    pub data: String,

    /// Base64 of the HMAC-SHA256 digest over the signed bytes
    pub hash: String,
}

impl SignedEnvelope {
    /// Build an envelope from raw data and its digest
    pub fn new(data: &[u8], hash: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(data),
            hash: STANDARD.encode(hash),
        }
    }

    /// Serialize to compact JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse an envelope from a request body
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }

    pub fn decode_hash(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.hash)
    }
}
