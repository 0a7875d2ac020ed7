use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use reqwest::Url;
use signed_webhook::outbound::webhook::hmac_signer::hmac_sha256;
use signed_webhook::outbound::webhook::{
    ChannelSecret, HmacSigner, SignedEnvelope, signing_timestamp,
};
use time::{Duration, OffsetDateTime};
use tokio::net::TcpListener;

pub const TIMESTAMP_SECRET: &[u8] = b"receiver-timestamp-secret";
pub const CHANNEL_SECRET: &[u8] = b"receiver-channel-secret";

/// What the receiver saw, in arrival order.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
}

/// Receiver whose trusted clock runs `true_offset_ms` ahead of the local clock.
pub struct ReceiverState {
    true_offset_ms: i64,
    signer: HmacSigner,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ReceiverState {
    fn trusted_now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc() + Duration::milliseconds(self.true_offset_ms)
    }

    fn record(&self, path: &str, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(RecordedRequest {
            path: path.to_string(),
            user_agent: header("user-agent"),
            content_type: header("content-type"),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

pub struct Receiver {
    pub base_url: String,
    pub state: Arc<ReceiverState>,
}

impl Receiver {
    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{path}", self.base_url)).unwrap()
    }
}

/// Spawn a receiver on an ephemeral port.
///
/// `POST /ts` answers signed probes with the offset of its trusted clock and
/// `POST /hook` answers 403 unless the envelope was signed for the current or
/// previous trusted minute.
pub async fn spawn_receiver(true_offset_ms: i64) -> Receiver {
    let state = Arc::new(ReceiverState {
        true_offset_ms,
        signer: HmacSigner::new(ChannelSecret::from(CHANNEL_SECRET)),
        requests: Mutex::new(Vec::new()),
    });

    let router = Router::new()
        .route("/ts", post(timestamp))
        .route("/hook", post(hook))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Receiver {
        base_url: format!("http://127.0.0.1:{port}"),
        state,
    }
}

async fn timestamp(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    state.record("/ts", &headers);

    let Some((data, hash)) = decode(&body) else {
        return (StatusCode::BAD_REQUEST, String::new());
    };

    let is_decimal = std::str::from_utf8(&data)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .is_some();
    if !is_decimal {
        return (StatusCode::BAD_REQUEST, String::new());
    }

    if hmac_sha256(TIMESTAMP_SECRET, &data) != hash {
        return (StatusCode::FORBIDDEN, String::new());
    }

    (StatusCode::OK, state.true_offset_ms.to_string())
}

async fn hook(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    state.record("/hook", &headers);

    let Some((payload, hash)) = decode(&body) else {
        return (StatusCode::BAD_REQUEST, String::new());
    };

    let now = state.trusted_now();
    let valid = [now, now - Duration::minutes(1)]
        .into_iter()
        .any(|t| state.signer.verify(&payload, &hash, &signing_timestamp(t)));

    if !valid {
        return (StatusCode::FORBIDDEN, String::new());
    }

    let echo: serde_json::Value = serde_json::from_slice(&payload).unwrap_or_default();
    (
        StatusCode::OK,
        serde_json::json!({"ok": true, "echo": echo}).to_string(),
    )
}

fn decode(body: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let envelope = SignedEnvelope::from_json(body).ok()?;
    Some((envelope.decode_data().ok()?, envelope.decode_hash().ok()?))
}
