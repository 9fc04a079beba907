// Attempt-limited exponential backoff
//
// One `ReconnectState` instance per resilience domain: the capture
// subprocess and the ASR session each get their own. The state machine is
// time-injected so tests never sleep; the pipeline owns the actual delay.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff parameters for one resilience domain.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum consecutive attempts before the domain is declared
    /// exhausted.
    pub max_attempts: u32,
    /// Window after the last attempt in which the attempt counter is
    /// preserved. Once it fully elapses the counter resets.
    pub cooldown: Duration,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed delay.
    pub cap_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            cooldown: Duration::from_secs(60),
            base_delay: Duration::from_millis(500),
            cap_delay: Duration::from_secs(30),
        }
    }
}

/// Per-domain reconnect bookkeeping.
#[derive(Debug)]
pub struct ReconnectState {
    policy: BackoffPolicy,
    attempt_count: u32,
    last_attempt_at: Option<Instant>,
    in_flight: bool,
}

impl ReconnectState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt_count: 0,
            last_attempt_at: None,
            in_flight: false,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether a restart may proceed now.
    ///
    /// False while a restart is in flight. If the cooldown has fully
    /// elapsed since the last attempt the counter resets first, so a
    /// domain that failed long ago gets a fresh budget. Otherwise false
    /// once the attempt budget is spent.
    pub fn should_attempt(&mut self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        if let Some(last) = self.last_attempt_at {
            if now.duration_since(last) > self.policy.cooldown {
                debug!(
                    "cooldown elapsed, resetting attempt counter (was {})",
                    self.attempt_count
                );
                self.attempt_count = 0;
            }
        }
        if self.attempt_count >= self.policy.max_attempts {
            return false;
        }
        true
    }

    /// Record the start of an attempt and return the delay to wait
    /// before invoking the restart action.
    pub fn begin_attempt(&mut self, now: Instant) -> Duration {
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        self.in_flight = true;
        let exp = self.attempt_count.saturating_sub(1).min(20);
        let factor = 1u64 << exp;
        let delay_ms = self
            .policy
            .base_delay
            .as_millis()
            .saturating_mul(factor as u128)
            .min(self.policy.cap_delay.as_millis());
        debug!(
            "reconnect attempt {}/{} (delay {}ms)",
            self.attempt_count, self.policy.max_attempts, delay_ms
        );
        Duration::from_millis(delay_ms as u64)
    }

    /// The restart action completed; counters reset.
    pub fn succeed(&mut self) {
        self.attempt_count = 0;
        self.in_flight = false;
    }

    /// The restart action failed; the counter stays incremented for the
    /// next `should_attempt` check.
    pub fn fail(&mut self) {
        self.in_flight = false;
        if self.exhausted() {
            warn!(
                "reconnect attempts exhausted ({}/{})",
                self.attempt_count, self.policy.max_attempts
            );
        }
    }

    /// Max attempts reached without success; manual intervention is
    /// required until the cooldown elapses.
    pub fn exhausted(&self) -> bool {
        self.attempt_count >= self.policy.max_attempts
    }

    /// Forget all state, e.g. after a deliberate stop cancels pending
    /// reconnect work.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.last_attempt_at = None;
        self.in_flight = false;
    }
}
