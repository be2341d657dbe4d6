use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::LimiterError;

/// Largest `num_events` a limiter accepts; bounds per-key memory.
pub const MAX_EVENTS_PER_KEY: usize = 1 << 16;

/// Bucket state for a single key.
///
/// The bucket holds `num_events` tokens. Every admitted event spends one and
/// that token comes back exactly `duration` later. Refill is stepwise, one
/// token per returned spend, not continuous: the average rate is
/// `num_events / duration` and no rolling window of that length admits more
/// than `num_events` events.
struct Limit {
    spent: VecDeque<Instant>,
    last_event: Instant,
}

impl Limit {
    fn new(capacity: usize, at: Instant) -> Self {
        Self {
            spent: VecDeque::with_capacity(capacity.min(16)),
            last_event: at,
        }
    }

    fn refill(&mut self, at: Instant, window: Duration) {
        while self
            .spent
            .front()
            .map_or(false, |&t| at.saturating_duration_since(t) >= window)
        {
            self.spent.pop_front();
        }
    }

    fn take(&mut self, at: Instant, window: Duration, capacity: usize) -> bool {
        self.refill(at, window);
        if self.spent.len() >= capacity {
            return false;
        }
        // Keeps spend times ordered when callers report events out of order.
        let spent_at = self.spent.back().map_or(at, |&last| last.max(at));
        self.spent.push_back(spent_at);
        true
    }
}

/// Per-key admission control with a bounded number of tracked keys.
///
/// `last_event` is last-write-wins: a caller reporting an older `occurs_at`
/// than a previous call moves the key's recorded activity backwards.
pub struct RateLimiter {
    duration: Duration,
    num_events: usize,
    num_limits: usize,
    limits: Mutex<HashMap<String, Limit>>,
}

impl RateLimiter {
    pub fn new(duration: Duration, num_events: usize, num_limits: usize) -> Result<Self, LimiterError> {
        if duration.is_zero() {
            return Err(LimiterError::Config("duration must be positive".into()));
        }
        if num_events == 0 {
            return Err(LimiterError::Config("num_events must be positive".into()));
        }
        if num_events > MAX_EVENTS_PER_KEY {
            return Err(LimiterError::Config(format!(
                "num_events must be at most {}, got {}",
                MAX_EVENTS_PER_KEY, num_events
            )));
        }
        if num_limits == 0 {
            return Err(LimiterError::Config("num_limits must be positive".into()));
        }

        Ok(Self {
            duration,
            num_events,
            num_limits,
            limits: Mutex::new(HashMap::with_capacity(num_limits)),
        })
    }

    /// Reports whether an event for `key` at `occurs_at` is admitted.
    pub fn is_allowed(&self, key: &str, occurs_at: Instant) -> bool {
        let mut limits = self.limits.lock();

        if let Some(limit) = limits.get_mut(key) {
            limit.last_event = occurs_at;
            return limit.take(occurs_at, self.duration, self.num_events);
        }

        if limits.len() >= self.num_limits {
            let oldest = limits
                .iter()
                .min_by_key(|(_, limit)| limit.last_event)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                limits.remove(&oldest);
                debug!(evicted = %oldest, "Rate limiter full, evicted oldest key");
            }
        }

        let mut limit = Limit::new(self.num_events, occurs_at);
        let allowed = limit.take(occurs_at, self.duration, self.num_events);
        limits.insert(key.to_string(), limit);
        allowed
    }

    /// Tokens `key` could spend at `at` without being denied.
    pub fn remaining(&self, key: &str, at: Instant) -> usize {
        let mut limits = self.limits.lock();
        match limits.get_mut(key) {
            Some(limit) => {
                limit.refill(at, self.duration);
                self.num_events.saturating_sub(limit.spent.len())
            }
            None => self.num_events,
        }
    }

    /// Drops every key idle for longer than `duration` as of `now`.
    pub fn cleanup(&self, now: Instant) -> usize {
        let mut limits = self.limits.lock();
        let before = limits.len();
        limits.retain(|_, limit| now.saturating_duration_since(limit.last_event) <= self.duration);
        before - limits.len()
    }

    pub fn len(&self) -> usize {
        self.limits.lock().len()
    }

    /// Sweeps idle keys every `duration` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(duration_ms = self.duration.as_millis() as u64, "Rate limiter cleanup started");

        let mut ticker = interval(self.duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.cleanup(Instant::now());
                    if removed > 0 {
                        debug!(removed, "Removed idle rate limit entries");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Rate limiter cleanup shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_rejects_non_positive_parameters() {
        assert!(RateLimiter::new(Duration::ZERO, 3, 3).is_err());
        assert!(RateLimiter::new(ms(1), 0, 3).is_err());
        assert!(RateLimiter::new(ms(1), 3, 0).is_err());
        assert!(RateLimiter::new(ms(1), 3, 3).is_ok());
    }

    #[test]
    fn test_huge_num_events_rejected() {
        assert!(RateLimiter::new(Duration::from_secs(1), 1 << 60, 4).is_err());
        assert!(RateLimiter::new(Duration::from_secs(1), MAX_EVENTS_PER_KEY + 1, 4).is_err());
    }

    #[test]
    fn test_largest_num_events_admits_without_preallocating() {
        let limiter = RateLimiter::new(Duration::from_secs(1), MAX_EVENTS_PER_KEY, 4).unwrap();
        let t = Instant::now();

        for i in 0..10 {
            assert!(limiter.is_allowed(&format!("ip-{}", i), t));
        }
        assert_eq!(limiter.len(), 4);
        assert_eq!(limiter.remaining("ip-9", t), MAX_EVENTS_PER_KEY - 1);
    }

    #[test]
    fn test_fourth_immediate_call_is_denied() {
        let limiter = RateLimiter::new(ms(1), 3, 3).unwrap();
        let t = Instant::now();

        assert!(limiter.is_allowed("key", t));
        assert!(limiter.is_allowed("key", t));
        assert!(limiter.is_allowed("key", t));
        assert!(!limiter.is_allowed("key", t));
    }

    #[test]
    fn test_tokens_return_after_duration() {
        let limiter = RateLimiter::new(ms(100), 2, 10).unwrap();
        let t = Instant::now();

        assert!(limiter.is_allowed("ip", t));
        assert!(limiter.is_allowed("ip", t + ms(40)));
        assert!(!limiter.is_allowed("ip", t + ms(99)));
        assert_eq!(limiter.remaining("ip", t + ms(99)), 0);

        // First token back at t + 100ms, second at t + 140ms.
        assert!(limiter.is_allowed("ip", t + ms(100)));
        assert!(!limiter.is_allowed("ip", t + ms(120)));
        assert!(limiter.is_allowed("ip", t + ms(140)));
    }

    #[test]
    fn test_keys_are_limited_independently() {
        let limiter = RateLimiter::new(ms(1000), 1, 10).unwrap();
        let t = Instant::now();

        assert!(limiter.is_allowed("a", t));
        assert!(!limiter.is_allowed("a", t));
        assert!(limiter.is_allowed("b", t));
        assert_eq!(limiter.remaining("c", t), 1);
    }

    #[test]
    fn test_tracked_keys_never_exceed_capacity() {
        let limiter = RateLimiter::new(ms(1000), 5, 8).unwrap();
        let t = Instant::now();

        for i in 0..100u64 {
            assert!(limiter.is_allowed(&format!("10.0.0.{}", i), t + ms(i)));
            assert!(limiter.len() <= 8);
        }
        assert_eq!(limiter.len(), 8);
    }

    #[test]
    fn test_full_table_evicts_oldest_event() {
        let limiter = RateLimiter::new(ms(1000), 1, 3).unwrap();
        let t = Instant::now();

        limiter.is_allowed("a", t + ms(10));
        limiter.is_allowed("b", t);
        limiter.is_allowed("c", t + ms(20));
        // Refreshing "b" makes "a" the oldest entry.
        limiter.is_allowed("b", t + ms(30));

        assert!(limiter.is_allowed("d", t + ms(40)));
        assert_eq!(limiter.len(), 3);

        // "a" was evicted so it comes back with a full bucket; "b" and "c" did not.
        assert_eq!(limiter.remaining("a", t + ms(50)), 1);
        assert_eq!(limiter.remaining("b", t + ms(50)), 0);
        assert_eq!(limiter.remaining("c", t + ms(50)), 0);
    }

    #[test]
    fn test_admissions_bounded_in_every_window() {
        let window = ms(100);
        let limiter = RateLimiter::new(window, 3, 4).unwrap();
        let t = Instant::now();

        let mut admitted = Vec::new();
        for step in 0..200u64 {
            let at = t + ms(step * 7);
            if limiter.is_allowed("burst", at) {
                admitted.push(at);
            }
        }

        assert!(!admitted.is_empty());
        for &start in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&a| a >= start && a < start + window)
                .count();
            assert!(in_window <= 3, "{} admissions inside one window", in_window);
        }
    }

    #[test]
    fn test_cleanup_removes_only_stale_entries() {
        let limiter = RateLimiter::new(ms(100), 3, 10).unwrap();
        let t = Instant::now();

        limiter.is_allowed("old", t);
        limiter.is_allowed("fresh", t + ms(150));

        assert_eq!(limiter.cleanup(t + ms(90)), 0);
        assert_eq!(limiter.len(), 2);

        assert_eq!(limiter.cleanup(t + ms(200)), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.remaining("fresh", t + ms(200)), 2);

        // Nothing else is stale yet.
        assert_eq!(limiter.cleanup(t + ms(200)), 0);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_concurrent_callers_share_one_bucket() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 50, 10).unwrap());
        let t = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.is_allowed("shared", t)).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_idle_keys_and_stops_on_cancel() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1), 3, 10).unwrap());
        limiter.is_allowed("idle", Instant::now());
        assert_eq!(limiter.len(), 1);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            async move { limiter.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(limiter.len(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
