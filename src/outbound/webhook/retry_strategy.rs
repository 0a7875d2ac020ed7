use std::time::Duration;

use crate::domain::ports::DeliveryError;

/// Retries allowed per submission, shared by message sends and time syncs.
pub const MAX_RETRIES: u32 = 4;

/// Delay before a scheduled resend or resync fires.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1);

/// What the engine should do after a failed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-sign and retransmit the pending message.
    Resend,

    /// Refresh the clock offset before retransmitting.
    Resync,

    /// Report a permanent failure.
    GiveUp,
}

/// Retry policy for webhook delivery.
///
/// Retries fire after a fixed minimal delay; there is no backoff growth.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,

    delay: Duration,
}

impl RetryStrategy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn default_strategy() -> Self {
        Self::new(MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// A fresh budget for a new submission or forced resync.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.max_retries)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::default_strategy()
    }
}

/// Remaining retries for the current submission.
///
/// A single counter is drawn down by both message failures and time-sync
/// failures, bounding the total number of attempts per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(remaining: u32) -> Self {
        Self { remaining }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Take one retry if any is left.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Decide how to continue after a message POST failed.
    pub fn after_message_failure(&mut self, error: &DeliveryError) -> RetryAction {
        if !error.is_retryable() || !self.try_consume() {
            return RetryAction::GiveUp;
        }

        // The receiver answers 403 when the time-bound key did not match
        if error.is_auth_rejected() {
            RetryAction::Resync
        } else {
            RetryAction::Resend
        }
    }

    /// Decide how to continue after a time-sync POST failed.
    pub fn after_sync_failure(&mut self, error: &DeliveryError) -> RetryAction {
        if error.is_retryable() && self.try_consume() {
            RetryAction::Resync
        } else {
            RetryAction::GiveUp
        }
    }
}
