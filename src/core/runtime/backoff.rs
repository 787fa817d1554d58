// src/core/runtime/backoff.rs

//! Exponential backoff with jitter for reconcile retries.

use std::time::Duration;

use rand::Rng;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// The shortest retry delay.
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Retries never wait longer than this.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Jitter applied to CAS-conflict retries so colliding controllers spread out.
const CONFLICT_JITTER: Duration = Duration::from_millis(150);

/// Per-controller retry state.
#[derive(Debug)]
pub struct Backoff {
    attempts: u32,
    rng: SmallRng,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    /// The delay before the next retry, doubling per attempt up to the cap,
    /// with up to 25% additive jitter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempts.min(10);
        self.attempts = self.attempts.saturating_add(1);
        let base = BASE_DELAY.saturating_mul(1 << exp).min(MAX_DELAY);
        let jitter_budget = (base / 4).as_millis() as u64;
        let jitter = if jitter_budget > 0 {
            Duration::from_millis(self.rng.gen_range(0..=jitter_budget))
        } else {
            Duration::ZERO
        };
        (base + jitter).min(MAX_DELAY)
    }

    /// A small randomized delay for immediate re-scheduling after a CAS
    /// conflict.
    pub fn conflict_jitter(&mut self) -> Duration {
        Duration::from_millis(self.rng.gen_range(0..=CONFLICT_JITTER.as_millis() as u64))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
