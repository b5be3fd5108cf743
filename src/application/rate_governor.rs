//! Shared outbound call budget.
//!
//! A single `RateGovernor` instance arbitrates every API call and attachment
//! download in the run. It combines a token bucket refilled at the API's
//! published steady-state rate with a cooldown window entered whenever the
//! server signals throttling.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

/// First cooldown delay when the server throttles without a hint.
const THROTTLE_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cooldown ceiling for hintless throttles.
const THROTTLE_MAX_DELAY: Duration = Duration::from_secs(60);

/// Jitter applied to hintless cooldowns (±20%).
const JITTER_RATIO: f64 = 0.2;

/// Shared arbiter of outbound call rate.
pub struct RateGovernor {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<GovernorState>,
}

struct GovernorState {
    tokens: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
    consecutive_throttles: u32,
}

impl GovernorState {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

impl RateGovernor {
    /// Create a governor with the given steady-state rate and burst capacity.
    #[must_use]
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(requests_per_minute.max(1)) / 60.0,
            state: Mutex::new(GovernorState {
                tokens: capacity,
                last_refill: Instant::now(),
                cooldown_until: None,
                consecutive_throttles: 0,
            }),
        }
    }

    /// Block until `cost` tokens are available and no cooldown is active.
    pub async fn acquire(&self, cost: u32) {
        let cost = f64::from(cost.max(1));
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.refill(now, self.refill_per_sec, self.capacity);

                if let Some(until) = state.cooldown_until {
                    if now < until {
                        until - now
                    } else {
                        state.cooldown_until = None;
                        continue;
                    }
                } else if state.tokens >= cost {
                    state.tokens -= cost;
                    return;
                } else {
                    let deficit = cost - state.tokens;
                    Duration::from_secs_f64(deficit / self.refill_per_sec)
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Register a throttling signal from the server.
    ///
    /// With a `Retry-After` hint the cooldown honors it exactly; without one
    /// the delay doubles per consecutive throttle, capped, with ±20% jitter.
    /// The cooldown window only ever extends, so concurrent callers reporting
    /// the same throttle cannot shorten an already-scheduled wait.
    pub async fn report_throttled(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().await;
        state.consecutive_throttles += 1;
        let delay =
            retry_after.unwrap_or_else(|| Self::hintless_delay(state.consecutive_throttles));
        let until = Instant::now() + delay;
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |u| u.max(until)));
        tracing::warn!(
            delay_ms = delay.as_millis() as u64,
            hinted = retry_after.is_some(),
            consecutive = state.consecutive_throttles,
            "entering throttle cooldown"
        );
    }

    /// Reset the consecutive-throttle streak after a successful call.
    pub async fn report_success(&self) {
        self.state.lock().await.consecutive_throttles = 0;
    }

    /// Backoff delay for the nth consecutive hintless throttle.
    fn hintless_delay(consecutive: u32) -> Duration {
        let exp = consecutive.saturating_sub(1).min(16);
        let base = THROTTLE_BASE_DELAY
            .saturating_mul(2u32.saturating_pow(exp))
            .min(THROTTLE_MAX_DELAY);
        let jitter = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        base.mul_f64(1.0 + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_immediate() {
        let governor = RateGovernor::new(60, 5);
        let start = Instant::now();
        for _ in 0..5 {
            governor.acquire(1).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_empty_bucket_waits_for_refill() {
        // 600 rpm = 10 tokens/sec, so the drained bucket needs ~100ms.
        let governor = RateGovernor::new(600, 1);
        governor.acquire(1).await;

        let start = Instant::now();
        governor.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_retry_hint_is_honored() {
        let governor = RateGovernor::new(6000, 10);
        governor
            .report_throttled(Some(Duration::from_millis(200)))
            .await;

        let start = Instant::now();
        governor.acquire(1).await;
        assert!(
            start.elapsed() >= Duration::from_millis(200),
            "call issued before the hinted wait elapsed"
        );
    }

    #[tokio::test]
    async fn test_hintless_delays_are_non_decreasing_until_cap() {
        // Jitter is ±20% while the base doubles, so below the cap successive
        // delays cannot decrease: 2x * 0.8 > 1x * 1.2.
        let mut previous = Duration::ZERO;
        for n in 1..=6 {
            let delay = RateGovernor::hintless_delay(n);
            assert!(delay >= previous, "delay for throttle {n} decreased");
            previous = delay;
        }
        // Past the cap the base stops growing but never exceeds it.
        for n in 7..=12 {
            let delay = RateGovernor::hintless_delay(n);
            assert!(delay <= THROTTLE_MAX_DELAY.mul_f64(1.0 + JITTER_RATIO));
            assert!(delay >= THROTTLE_MAX_DELAY.mul_f64(1.0 - JITTER_RATIO));
        }
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let governor = RateGovernor::new(6000, 10);
        governor.report_throttled(None).await;
        governor.report_throttled(None).await;
        governor.report_success().await;
        assert_eq!(governor.state.lock().await.consecutive_throttles, 0);
    }
}
