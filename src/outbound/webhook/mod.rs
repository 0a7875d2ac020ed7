// Signed webhook delivery
//
// Building blocks (no async, no I/O):
//   key_stretch, hmac_signer, schemas, retry_strategy
//
// Runtime components:
//   clock_sync      – process-wide offset to the trusted time source
//   http_client     – reqwest transport for signed envelopes
//   delivery_engine – per-channel state machine: sign, transmit, retry, resync

pub mod clock_sync;
pub mod delivery_engine;
pub mod hmac_signer;
pub mod http_client;
pub mod key_stretch;
pub mod retry_strategy;
pub mod schemas;

// Re-export commonly used types
pub use clock_sync::{ClockSyncService, parse_offset};
pub use delivery_engine::{
    DeliveryEngine, DeliveryEngineBuilder, DeliveryHandle, EngineError, EngineState,
};
pub use hmac_signer::{ChannelSecret, HmacSigner, sign_time_probe, signing_timestamp};
pub use http_client::{HttpClientError, WebhookHttpClient, default_user_agent};
pub use key_stretch::{HMAC_BLOCK_LENGTH, stretch_key};
pub use retry_strategy::{MAX_RETRIES, RetryAction, RetryBudget, RetryStrategy};
pub use schemas::SignedEnvelope;
