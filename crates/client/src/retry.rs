//! Login retry policy with jittered exponential back-off.
//!
//! Nothing in the client retries on its own; this only drives an explicit
//! [`ClientBuilder::login_with_retry`](crate::ClientBuilder::login_with_retry).
//! Each login run draws its own [`Backoff`] schedule, seeded from the node
//! address and a process-wide counter, so clients started together against
//! one node spread their retries out.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fl_domain::config::RetryConfig;

/// Jittered delays land in `[1 - JITTER, 1 + JITTER]` times the base delay.
const JITTER: f64 = 0.25;

static SCHEDULES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    /// Cap on the delay between attempts, before jitter.
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Attempts including the first one. `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_attempts: cfg.max_attempts,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// A fresh schedule for one login run against `address`.
    pub fn schedule_for(&self, address: &str) -> Backoff {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        let run = SCHEDULES.fetch_add(1, Ordering::Relaxed);
        self.schedule(hasher.finish() ^ splitmix64(run))
    }

    /// A schedule with an explicit jitter seed.
    pub fn schedule(&self, seed: u64) -> Backoff {
        Backoff {
            policy: self.clone(),
            seed,
            retries: 0,
        }
    }

    /// Un-jittered delay before retry number `retry` (0-indexed).
    fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

/// Delays between the attempts of one login run. Yields `None` once the
/// policy's attempt budget is spent.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    seed: u64,
    retries: u32,
}

impl Backoff {
    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let max = self.policy.max_attempts;
        if max > 0 && self.retries.saturating_add(1) >= max {
            return None;
        }
        let base = self.policy.base_delay(self.retries);
        let spread = unit_interval(splitmix64(self.seed ^ u64::from(self.retries)));
        self.retries = self.retries.saturating_add(1);

        let scale = 1.0 - JITTER + 2.0 * JITTER * spread;
        Some(Duration::try_from_secs_f64(base.as_secs_f64() * scale).unwrap_or(base))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Top 53 bits as a fraction in [0, 1).
fn unit_interval(x: u64) -> f64 {
    (x >> 11) as f64 / (1u64 << 53) as f64
}
