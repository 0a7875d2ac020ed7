use std::sync::Arc;

use color_eyre::eyre::{Context, eyre};
use signed_webhook::config::Config;
use signed_webhook::domain::events::DeliveryEvent;
use signed_webhook::outbound::webhook::DeliveryEngine;
use signed_webhook::telemetry;
use tokio::io::AsyncReadExt;

/// Reads one JSON document from stdin and delivers it to the configured endpoint.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    let destination = config
        .delivery
        .destination()?
        .ok_or_else(|| eyre!("WEBHOOK_DELIVERY__DESTINATION_URL is not set"))?;
    if config.delivery.channel_secret.is_empty() {
        tracing::warn!("No channel secret configured; signatures use an empty key");
    }
    let clock = Arc::new(config.clock.build_service()?);
    let transport = Arc::new(config.delivery.http_client()?);

    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .wrap_err("Failed to read payload from stdin")?;
    let payload: serde_json::Value =
        serde_json::from_slice(&input).wrap_err("Payload on stdin is not valid JSON")?;

    let (handle, mut events) =
        DeliveryEngine::builder(config.delivery.channel_secret()?, clock, transport)
            .retry_strategy(config.delivery.retry_strategy())
            .spawn();
    handle.submit(destination, &payload)?;

    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        match event {
            DeliveryEvent::RawResponseReceived(body) => {
                println!("{}", String::from_utf8_lossy(&body));
            }
            DeliveryEvent::DeliveryFailed(error) => {
                return Err(eyre!("Delivery failed (code {}): {error}", error.code()));
            }
            other => tracing::debug!(event = ?other, "Delivery event"),
        }
        if terminal {
            return Ok(());
        }
    }

    Err(eyre!("Delivery engine stopped before reporting an outcome"))
}
