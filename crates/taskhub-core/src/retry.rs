//! Retry policy, backoff math, and the per-chain retry state machine.
//!
//! This module is sync-only. The async driver that sleeps between attempts
//! lives in `taskhub-notify` (the publisher); here we only decide *what*
//! happens next given an attempt outcome and the elapsed time.
//!
//! - [`RetryPolicy`]: attempts, backoff, jitter, timeouts
//! - [`calculate_backoff_delay`]: exponential backoff, jitter upper bound
//! - [`calculate_backoff_delay_with_random`]: exponential backoff with symmetric jitter
//! - [`RetryChain`]: `Pending → InFlight → Retrying → … → Succeeded | Exhausted`

use std::fmt;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;
/// Default timeout for a single attempt in milliseconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 10_000;
/// Default timeout for a whole chain in milliseconds.
pub const DEFAULT_CHAIN_TIMEOUT_MS: u64 = 30_000;

/// Parameters of one retry chain.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay (before jitter).
    pub max_delay: Duration,
    /// Symmetric jitter range, 0.0 disables jitter.
    pub jitter_factor: f64,
    /// Bound on a single deliver call.
    pub attempt_timeout: Duration,
    /// Bound on the whole chain, backoff included.
    pub chain_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            chain_timeout: Duration::from_millis(DEFAULT_CHAIN_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry_index` (0 for the first retry).
    ///
    /// `random` must be in `[0.0, 1.0]`; 0.5 yields the un-jittered value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay_for(&self, retry_index: u32, random: f64) -> Duration {
        let ms = calculate_backoff_delay_with_random(
            retry_index,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            self.jitter_factor,
            random,
        );
        Duration::from_millis(ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound of the backoff delay for a retry index.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + jitter)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);
    let with_jitter = (capped as f64) * (1.0 + jitter_factor);
    with_jitter.round() as u64
}

/// Backoff delay with explicit randomness.
///
/// `random` in `[0.0, 1.0]` maps to a multiplier in
/// `[1 - jitter, 1 + jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

/// Why a chain gave up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExhaustReason {
    /// Every allowed attempt failed.
    MaxAttempts,
    /// The next backoff would cross the chain timeout.
    Deadline,
    /// The last error was permanent.
    NonRetryable,
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MaxAttempts => "max_attempts",
            Self::Deadline => "deadline",
            Self::NonRetryable => "non_retryable",
        })
    }
}

/// Where a chain is in its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt started yet.
    Pending,
    /// An attempt is running.
    InFlight {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// The last attempt failed; the next starts after `next_delay`.
    Retrying {
        /// Number of the attempt that just failed.
        attempt: u32,
        /// Backoff before the next attempt.
        next_delay: Duration,
    },
    /// An attempt succeeded.
    Succeeded {
        /// Attempts used.
        attempts: u32,
    },
    /// The chain gave up.
    Exhausted {
        /// Attempts used.
        attempts: u32,
        /// Why.
        reason: ExhaustReason,
    },
}

impl RetryState {
    /// Whether the chain is finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}

/// Retry state machine for one event's delivery chain.
///
/// Attempts are strictly sequential: [`begin_attempt`](Self::begin_attempt)
/// refuses to start a second attempt while one is in flight.
#[derive(Clone, Debug)]
pub struct RetryChain {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
}

impl RetryChain {
    /// Start a chain in `Pending`.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Pending,
            attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The policy driving this chain.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Move to `InFlight` and return the new attempt number.
    ///
    /// Returns `None` when the chain is terminal or already in flight.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        match self.state {
            RetryState::Pending | RetryState::Retrying { .. } => {
                self.attempts += 1;
                self.state = RetryState::InFlight {
                    attempt: self.attempts,
                };
                Some(self.attempts)
            }
            _ => None,
        }
    }

    /// Record that the in-flight attempt succeeded.
    pub fn record_success(&mut self) -> RetryState {
        if matches!(self.state, RetryState::InFlight { .. }) {
            self.state = RetryState::Succeeded {
                attempts: self.attempts,
            };
        }
        self.state.clone()
    }

    /// Record that the in-flight attempt failed.
    ///
    /// `elapsed` is the time since the chain started, `retryable` whether the
    /// error is transient, and `random` the jitter sample in `[0.0, 1.0]`.
    pub fn record_failure(&mut self, elapsed: Duration, retryable: bool, random: f64) -> RetryState {
        if !matches!(self.state, RetryState::InFlight { .. }) {
            return self.state.clone();
        }

        let attempts = self.attempts;
        self.state = if !retryable {
            RetryState::Exhausted {
                attempts,
                reason: ExhaustReason::NonRetryable,
            }
        } else if attempts >= self.policy.max_attempts {
            RetryState::Exhausted {
                attempts,
                reason: ExhaustReason::MaxAttempts,
            }
        } else {
            let next_delay = self.policy.delay_for(attempts - 1, random);
            if elapsed.saturating_add(next_delay) >= self.policy.chain_timeout {
                RetryState::Exhausted {
                    attempts,
                    reason: ExhaustReason::Deadline,
                }
            } else {
                RetryState::Retrying {
                    attempt: attempts,
                    next_delay,
                }
            }
        };
        self.state.clone()
    }

    /// Give up because the chain deadline passed during an attempt.
    pub fn record_deadline(&mut self) -> RetryState {
        if !self.state.is_terminal() {
            self.state = RetryState::Exhausted {
                attempts: self.attempts,
                reason: ExhaustReason::Deadline,
            };
        }
        self.state.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
