use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::domain::events::{DeliveryEvent, DeliveryHooks, EventSink, ForwardingHooks};
use crate::domain::ports::{DeliveryError, WebhookTransport};
use crate::outbound::webhook::clock_sync::ClockSyncService;
use crate::outbound::webhook::hmac_signer::{ChannelSecret, HmacSigner};
use crate::outbound::webhook::retry_strategy::{RetryAction, RetryBudget, RetryStrategy};

/// Observable state of a [`DeliveryEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Idle,

    AwaitingTimestampSync,

    AwaitingMessageReply,

    RetryPendingResend,

    RetryPendingResync,
}

/// Errors returned by [`DeliveryHandle`] calls.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to serialise payload: {0}")]
    Serialization(String),

    #[error("Delivery engine has stopped")]
    Closed,
}

/// Requests from callers.
#[derive(Debug)]
enum Command {
    Submit { url: Url, payload: Vec<u8> },
    ForceResync,
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Resend,
    Resync,
}

/// Completions posted back by spawned transport calls and timers.
///
/// `exchange` identifies the request that produced the message; anything not
/// matching the engine's current exchange belongs to superseded work.
#[derive(Debug)]
enum Completion {
    MessageReply {
        exchange: u64,
        result: Result<Vec<u8>, DeliveryError>,
    },
    TimestampReply {
        exchange: u64,
        result: Result<i64, DeliveryError>,
    },
    TimerFired {
        exchange: u64,
        timer: Timer,
    },
}

impl Completion {
    fn exchange(&self) -> u64 {
        match self {
            Completion::MessageReply { exchange, .. }
            | Completion::TimestampReply { exchange, .. }
            | Completion::TimerFired { exchange, .. } => *exchange,
        }
    }
}

/// The payload currently being delivered.
#[derive(Debug)]
struct PendingDelivery {
    url: Url,
    payload: Vec<u8>,
}

/// Cloneable front end to a running [`DeliveryEngine`].
///
/// Every call is fire-and-forget; outcomes arrive on the event receiver returned
/// by [`DeliveryEngineBuilder::spawn`]. The engine stops once every handle has
/// been dropped and no delivery is outstanding.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<EngineState>,
}

impl DeliveryHandle {
    /// Deliver a JSON document, superseding any delivery still in progress.
    pub fn submit(&self, url: Url, payload: &Value) -> Result<(), EngineError> {
        let payload =
            serde_json::to_vec(payload).map_err(|e| EngineError::Serialization(e.to_string()))?;
        self.submit_raw(url, payload)
    }

    /// Deliver bytes that are already compact JSON.
    pub fn submit_raw(&self, url: Url, payload: Vec<u8>) -> Result<(), EngineError> {
        self.send(Command::Submit { url, payload })
    }

    /// Drop any pending delivery and measure the clock offset again.
    pub fn force_timestamp_resync(&self) -> Result<(), EngineError> {
        self.send(Command::ForceResync)
    }

    /// Last state published by the engine.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }
}

/// Configures and starts a [`DeliveryEngine`].
pub struct DeliveryEngineBuilder {
    secret: ChannelSecret,
    clock: Arc<ClockSyncService>,
    transport: Arc<dyn WebhookTransport>,
    strategy: RetryStrategy,
    hooks: Box<dyn DeliveryHooks>,
}

impl DeliveryEngineBuilder {
    /// Override the retry strategy.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Intercept outcomes before they reach the event stream.
    pub fn hooks(mut self, hooks: impl DeliveryHooks) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Launch the engine task on the current tokio runtime.
    pub fn spawn(self) -> (DeliveryHandle, mpsc::UnboundedReceiver<DeliveryEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let (events, event_rx) = EventSink::channel();

        let engine = DeliveryEngine {
            signer: HmacSigner::new(self.secret),
            clock: self.clock,
            transport: self.transport,
            budget: self.strategy.budget(),
            strategy: self.strategy,
            hooks: self.hooks,
            events,
            pending: None,
            exchange: 0,
            state: EngineState::Idle,
            state_tx,
            completion_tx,
        };

        info!(
            max_retries = engine.strategy.max_retries(),
            "Webhook delivery engine starting"
        );
        tokio::spawn(engine.run(command_rx, completion_rx));

        let handle = DeliveryHandle {
            commands: command_tx,
            state: state_rx,
        };
        (handle, event_rx)
    }
}

/// Signs, transmits and retries one outbound webhook payload at a time.
///
/// All transitions run inside a single task that drains caller commands and
/// the completions of its own transport calls and retry timers.
pub struct DeliveryEngine {
    signer: HmacSigner,

    /// Shared clock offset, also refreshed by other engines.
    clock: Arc<ClockSyncService>,

    transport: Arc<dyn WebhookTransport>,

    strategy: RetryStrategy,

    /// Shared by message and time-sync failures of the current submission.
    budget: RetryBudget,

    hooks: Box<dyn DeliveryHooks>,

    events: EventSink,

    pending: Option<PendingDelivery>,

    /// Identity of the newest transmit or timer; older completions are ignored.
    exchange: u64,

    state: EngineState,

    state_tx: watch::Sender<EngineState>,

    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl DeliveryEngine {
    pub fn builder(
        secret: ChannelSecret,
        clock: Arc<ClockSyncService>,
        transport: Arc<dyn WebhookTransport>,
    ) -> DeliveryEngineBuilder {
        DeliveryEngineBuilder {
            secret,
            clock,
            transport,
            strategy: RetryStrategy::default_strategy(),
            hooks: Box::new(ForwardingHooks),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut callers_gone = false;

        loop {
            tokio::select! {
                command = commands.recv(), if !callers_gone => match command {
                    Some(command) => self.handle_command(command),
                    None => callers_gone = true,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }

            if callers_gone && self.state == EngineState::Idle {
                break;
            }
        }

        debug!("Webhook delivery engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { url, payload } => self.submit(url, payload),
            Command::ForceResync => self.force_resync(),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        if completion.exchange() != self.exchange {
            debug!(
                exchange = completion.exchange(),
                current = self.exchange,
                "Discarding outcome of superseded exchange"
            );
            return;
        }

        match completion {
            Completion::MessageReply { result, .. } => self.on_message_reply(result),
            Completion::TimestampReply { result, .. } => self.on_timestamp_reply(result),
            Completion::TimerFired {
                timer: Timer::Resend,
                ..
            } => self.transmit_message(),
            Completion::TimerFired {
                timer: Timer::Resync,
                ..
            } => self.transmit_timestamp_request(),
        }
    }

    fn submit(&mut self, url: Url, payload: Vec<u8>) {
        if let Some(previous) = &self.pending {
            debug!(url = %previous.url, "Superseding pending delivery");
        }

        self.budget = self.strategy.budget();
        self.pending = Some(PendingDelivery { url, payload });
        self.transmit_message();
    }

    fn force_resync(&mut self) {
        debug!("Forced clock resync requested");

        self.budget = self.strategy.budget();
        self.pending = None;
        self.transmit_timestamp_request();
    }

    /// Sign the pending payload with the current offset and POST it.
    fn transmit_message(&mut self) {
        let (url, body) = match &self.pending {
            Some(pending) => {
                let envelope = self.signer.sign(&pending.payload, self.clock.signing_time());
                (pending.url.clone(), envelope.to_json())
            }
            None => {
                self.finish();
                return;
            }
        };

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                self.fail(DeliveryError::ProtocolError(e.to_string()));
                return;
            }
        };

        let exchange = self.next_exchange();
        debug!(
            url = %url,
            exchange = exchange,
            remaining_retries = self.budget.remaining(),
            "Transmitting webhook"
        );

        let transport = self.transport.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = transport.post_json(&url, body).await;
            let _ = completions.send(Completion::MessageReply { exchange, result });
        });

        self.set_state(EngineState::AwaitingMessageReply);
    }

    fn transmit_timestamp_request(&mut self) {
        let exchange = self.next_exchange();
        debug!(
            exchange = exchange,
            remaining_retries = self.budget.remaining(),
            "Requesting clock resync"
        );

        let clock = self.clock.clone();
        let transport = self.transport.clone();
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = clock.measure_offset(transport.as_ref()).await;
            let _ = completions.send(Completion::TimestampReply { exchange, result });
        });

        self.set_state(EngineState::AwaitingTimestampSync);
    }

    fn schedule(&mut self, timer: Timer) {
        let exchange = self.next_exchange();
        let delay = self.strategy.delay();

        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = completions.send(Completion::TimerFired { exchange, timer });
        });

        self.set_state(match timer {
            Timer::Resend => EngineState::RetryPendingResend,
            Timer::Resync => EngineState::RetryPendingResync,
        });
    }

    fn on_message_reply(&mut self, result: Result<Vec<u8>, DeliveryError>) {
        match result {
            Ok(body) => {
                if let Some(pending) = &self.pending {
                    info!(
                        url = %pending.url,
                        attempts_left = self.budget.remaining(),
                        "Webhook delivered successfully"
                    );
                }
                self.finish();

                if let Ok(json) = serde_json::from_slice::<Value>(&body) {
                    self.hooks.on_json_response(&json, &self.events);
                }
                self.hooks.on_raw_response(&body, &self.events);
            }
            Err(error) => match self.budget.after_message_failure(&error) {
                RetryAction::Resend => {
                    warn!(
                        error = %error,
                        remaining_retries = self.budget.remaining(),
                        "Webhook delivery failed – will resend"
                    );
                    self.schedule(Timer::Resend);
                }
                RetryAction::Resync => {
                    warn!(
                        error = %error,
                        remaining_retries = self.budget.remaining(),
                        "Webhook signature rejected – will resync clock"
                    );
                    self.schedule(Timer::Resync);
                }
                RetryAction::GiveUp => {
                    error!(error = %error, "Webhook delivery permanently failed");
                    self.fail(error);
                }
            },
        }
    }

    fn on_timestamp_reply(&mut self, result: Result<i64, DeliveryError>) {
        match result {
            Ok(offset) => {
                self.clock.set_offset_millis(offset);
                info!(offset_millis = offset, "Clock offset updated");
                self.events.emit(DeliveryEvent::ClockOffsetUpdated(offset));

                if self.pending.is_some() {
                    self.transmit_message();
                } else {
                    self.finish();
                }
            }
            Err(error) => match self.budget.after_sync_failure(&error) {
                RetryAction::Resync => {
                    warn!(
                        error = %error,
                        remaining_retries = self.budget.remaining(),
                        "Clock resync failed – will retry"
                    );
                    self.schedule(Timer::Resync);
                }
                _ => {
                    error!(error = %error, "Clock resync permanently failed");
                    self.fail(error);
                }
            },
        }
    }

    fn fail(&mut self, error: DeliveryError) {
        self.finish();
        self.hooks.on_failure(&error, &self.events);
    }

    /// Clear the pending delivery and return to `Idle`.
    fn finish(&mut self) {
        self.pending = None;
        self.set_state(EngineState::Idle);
    }

    fn next_exchange(&mut self) -> u64 {
        self.exchange = self.exchange.wrapping_add(1);
        self.exchange
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}
