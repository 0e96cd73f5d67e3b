//! Shared outbound request throttle.
//!
//! A token bucket refilled with one token every `period / requests`, holding
//! at most `burst` tokens. Waiters queue on a fair mutex, so permits are
//! handed out first-come, first-served, and a waiter that gives up (its
//! future is dropped) consumes nothing.

use crate::config::RateConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Proof that the gate allowed one outbound request.
#[must_use = "a permit stands for one request; acquire it right before sending"]
#[derive(Debug)]
pub struct RatePermit(());

pub struct RateGate {
    bucket: Mutex<Bucket>,
    interval: Duration,
    capacity: u32,
}

struct Bucket {
    tokens: u32,
    /// Point in time the current token count was last brought up to date
    last_refill: Instant,
}

impl RateGate {
    /// Allow `requests` per `period`, with up to `burst` back-to-back requests.
    pub fn new(requests: u32, period: Duration, burst: u32) -> Self {
        let capacity = burst.max(1);
        let interval = period / requests.max(1);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            interval,
            capacity,
        }
    }

    pub fn from_config(config: &RateConfig) -> Self {
        Self::new(config.requests, config.period(), config.burst)
    }

    /// A gate that never waits.
    pub fn unlimited() -> Self {
        Self::new(1, Duration::ZERO, 1)
    }

    /// Time between two tokens
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until one more request may be sent.
    pub async fn acquire(&self) -> RatePermit {
        // Holding the lock while sleeping keeps later callers queued behind us.
        let mut bucket = self.bucket.lock().await;
        loop {
            let now = Instant::now();
            self.refill(&mut bucket, now);
            if bucket.tokens > 0 {
                bucket.tokens -= 1;
                return RatePermit(());
            }
            let wake_at = bucket.last_refill + self.interval;
            trace!(wait = ?wake_at.saturating_duration_since(now), "Rate gate empty, waiting");
            sleep_until(wake_at).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        if self.interval.is_zero() {
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let earned = elapsed.as_nanos() / self.interval.as_nanos();
        let missing = u128::from(self.capacity - bucket.tokens);
        if earned >= missing {
            bucket.tokens = self.capacity;
        } else if earned > 0 {
            // earned < missing <= capacity, so this fits in u32
            let earned = earned as u32;
            bucket.tokens += earned;
            bucket.last_refill += self.interval * earned;
        }
        if bucket.tokens == self.capacity {
            // A full bucket does not bank time toward the next token.
            bucket.last_refill = now;
        }
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("interval", &self.interval)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
