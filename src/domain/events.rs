use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::ports::DeliveryError;

/// Outcome notifications published by a delivery engine
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    /// The receiver answered with a body that parsed as JSON.
    StructuredResponseReceived(Value),

    /// The receiver answered; always published after any structured event.
    RawResponseReceived(Vec<u8>),

    /// The delivery (or the time sync it depended on) failed permanently.
    DeliveryFailed(DeliveryError),

    /// The shared clock offset changed after a successful time sync.
    ClockOffsetUpdated(i64),
}

impl DeliveryEvent {
    /// True for events that end a submission.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryEvent::RawResponseReceived(_) | DeliveryEvent::DeliveryFailed(_)
        )
    }
}

/// Sending half of an engine's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DeliveryEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<DeliveryEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeliveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: DeliveryEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped – discarding delivery event");
        }
    }
}

/// Capability interface for intercepting delivery outcomes.
///
/// Every method defaults to forwarding the outcome to the engine's [`EventSink`],
/// so implementors only override what they want to intercept.
pub trait DeliveryHooks: Send + 'static {
    fn on_json_response(&mut self, json: &Value, events: &EventSink) {
        events.emit(DeliveryEvent::StructuredResponseReceived(json.clone()));
    }

    fn on_raw_response(&mut self, raw: &[u8], events: &EventSink) {
        events.emit(DeliveryEvent::RawResponseReceived(raw.to_vec()));
    }

    fn on_failure(&mut self, error: &DeliveryError, events: &EventSink) {
        events.emit(DeliveryEvent::DeliveryFailed(error.clone()));
    }
}

/// Hooks that forward every outcome unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardingHooks;

impl DeliveryHooks for ForwardingHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forwarding_hooks_emit_events() {
        let (sink, mut rx) = EventSink::channel();
        let mut hooks = ForwardingHooks;

        hooks.on_json_response(&json!({"ok": true}), &sink);
        hooks.on_raw_response(br#"{"ok":true}"#, &sink);
        hooks.on_failure(&DeliveryError::HttpStatus(500), &sink);

        assert_eq!(
            rx.try_recv().unwrap(),
            DeliveryEvent::StructuredResponseReceived(json!({"ok": true}))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DeliveryEvent::RawResponseReceived(br#"{"ok":true}"#.to_vec())
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DeliveryEvent::DeliveryFailed(DeliveryError::HttpStatus(500))
        );
    }

    #[test]
    fn test_overridden_hook_can_swallow_failures() {
        struct Quiet;
        impl DeliveryHooks for Quiet {
            fn on_failure(&mut self, _error: &DeliveryError, _events: &EventSink) {}
        }

        let (sink, mut rx) = EventSink::channel();
        let mut hooks = Quiet;
        hooks.on_failure(&DeliveryError::AuthRejected(403), &sink);
        hooks.on_raw_response(b"done", &sink);

        assert_eq!(
            rx.try_recv().unwrap(),
            DeliveryEvent::RawResponseReceived(b"done".to_vec())
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(DeliveryEvent::ClockOffsetUpdated(5));
    }

    #[test]
    fn test_terminal_events() {
        assert!(DeliveryEvent::RawResponseReceived(vec![]).is_terminal());
        assert!(DeliveryEvent::DeliveryFailed(DeliveryError::HttpStatus(500)).is_terminal());
        assert!(!DeliveryEvent::ClockOffsetUpdated(0).is_terminal());
        assert!(!DeliveryEvent::StructuredResponseReceived(json!(1)).is_terminal());
    }
}
