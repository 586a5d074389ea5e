//! Retry timing: backoff policy, `Retry-After` hints and the clock used to wait between attempts.
//!
//! All waiting goes through [`Clock`] so retry and deadline behavior can be exercised in tests
//! without wall-clock delays.

use async_trait::async_trait;
use rand::Rng as _;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::{Duration, Instant, SystemTime};

/// Time source and sleeper for retry backoff and deadline checks.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Exponential backoff with a cap and symmetric random jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any computed delay (jitter included).
    pub cap: Duration,
    /// Jitter ratio in `[0.0, 1.0]`; `0.2` means ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Nominal (jitter-free) delay before retry number `retry` (1-based).
    #[must_use]
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Delay before retry number `retry` (1-based), jitter applied.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter.is_nan() || self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let jitter = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        nominal.mul_f64(factor).min(self.cap)
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date relative to `now`.
///
/// A date already in the past means "retry now". Unparseable values yield `None` and callers
/// fall back to the backoff policy.
#[must_use]
pub fn retry_after_hint(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(raw).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}
