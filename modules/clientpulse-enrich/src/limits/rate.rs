//! Per-resource rate limiter for automation-provider calls.
//!
//! Concurrency is bounded per limiter instance (one semaphore shared by all
//! resource keys it handles); call-rate accounting runs per key over a
//! trailing 24h window. The permit is held for the caller's entire critical
//! section so two logically-concurrent calls to the same agent cannot race
//! even when the rate window would allow both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86400);

/// Range of the randomized human-like delay applied after a call is
/// recorded, to avoid bot-detection signatures.
const HUMAN_DELAY_SECS: std::ops::Range<f64> = 10.0..30.0;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_calls_per_hour: usize,
    pub max_calls_per_day: usize,
    pub min_delay_between_calls: Duration,
    pub max_concurrent_calls: usize,
    pub enable_random_human_delay: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls_per_hour: 10,
            max_calls_per_day: 50,
            min_delay_between_calls: Duration::from_secs(60),
            max_concurrent_calls: 1,
            enable_random_human_delay: true,
        }
    }
}

/// Call history for one resource key. Timestamps are pruned to the trailing
/// 24h whenever eligibility is evaluated. In-flight calls are not tracked
/// here; the semaphore owns that accounting.
#[derive(Debug, Default)]
struct CallRecord {
    timestamps: Vec<Instant>,
    last_call_time: Option<Instant>,
}

/// Why a call must wait, and for how long.
enum Wait {
    Hourly(Duration, usize),
    Daily(Duration, usize),
    Spacing(Duration),
}

/// Evaluate one pass of the eligibility rules. Returns `None` when a call
/// may proceed now. Callers re-evaluate from scratch after every wait since
/// other limits may bind once time has passed.
fn required_wait(record: &mut CallRecord, config: &RateLimitConfig, now: Instant) -> Option<Wait> {
    record.timestamps.retain(|ts| now - *ts < DAY);

    let recent_hour: Vec<Instant> = record
        .timestamps
        .iter()
        .copied()
        .filter(|ts| now - *ts < HOUR)
        .collect();

    if recent_hour.len() >= config.max_calls_per_hour {
        let wait = HOUR - (now - recent_hour[0]) + Duration::from_secs(1);
        return Some(Wait::Hourly(wait, recent_hour.len()));
    }

    if record.timestamps.len() >= config.max_calls_per_day {
        let wait = DAY - (now - record.timestamps[0]) + Duration::from_secs(1);
        return Some(Wait::Daily(wait, record.timestamps.len()));
    }

    if let Some(last) = record.last_call_time {
        let elapsed = now - last;
        if elapsed < config.min_delay_between_calls {
            return Some(Wait::Spacing(config.min_delay_between_calls - elapsed));
        }
    }

    None
}

/// RAII permit for one rate-limited call. Dropping it (on any exit path)
/// releases the concurrency slot.
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateStats {
    pub hour: usize,
    pub day: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GlobalRateStats {
    pub total_calls_last_hour: usize,
    pub total_calls_last_day: usize,
    pub total_calls_all_time: usize,
    pub keys_tracked: usize,
}

pub struct ResourceRateLimiter {
    config: RateLimitConfig,
    semaphore: Arc<Semaphore>,
    records: Mutex<HashMap<String, CallRecord>>,
}

impl ResourceRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            calls_per_hour = config.max_calls_per_hour,
            calls_per_day = config.max_calls_per_day,
            max_concurrent = config.max_concurrent_calls,
            "Rate limiter initialized"
        );
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            records: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Block until a call against `key` is both concurrency-eligible and
    /// rate-eligible, record the call, then hand back a permit the caller
    /// holds for its whole critical section.
    pub async fn acquire(&self, key: &str) -> RatePermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");
        debug!(key, "Concurrency slot acquired");

        self.wait_until_eligible(key).await;
        self.record_call(key).await;

        if self.config.enable_random_human_delay {
            let delay = Duration::from_secs_f64(rand::rng().random_range(HUMAN_DELAY_SECS));
            debug!(key, delay_secs = delay.as_secs_f64(), "Applying human-like delay");
            tokio::time::sleep(delay).await;
        }

        RatePermit { _permit: permit }
    }

    /// Explicit loop rather than recursion: pathological configs (tiny caps,
    /// bursty callers) could otherwise stack re-checks without bound.
    async fn wait_until_eligible(&self, key: &str) {
        loop {
            let wait = {
                let mut records = self.records.lock().await;
                let record = records.entry(key.to_string()).or_default();
                required_wait(record, &self.config, Instant::now())
            };

            let sleep_for = match wait {
                None => return,
                Some(Wait::Hourly(wait, recent)) => {
                    warn!(
                        key,
                        recent,
                        limit = self.config.max_calls_per_hour,
                        wait_secs = wait.as_secs(),
                        "Hourly limit reached, waiting"
                    );
                    wait
                }
                Some(Wait::Daily(wait, recent)) => {
                    warn!(
                        key,
                        recent,
                        limit = self.config.max_calls_per_day,
                        wait_hours = wait.as_secs_f64() / 3600.0,
                        "Daily limit reached, waiting"
                    );
                    wait
                }
                Some(Wait::Spacing(wait)) => {
                    info!(key, wait_secs = wait.as_secs_f64(), "Enforcing minimum delay between calls");
                    wait
                }
            };

            tokio::time::sleep(sleep_for).await;
        }
    }

    async fn record_call(&self, key: &str) {
        let mut records = self.records.lock().await;
        let record = records.entry(key.to_string()).or_default();
        let now = Instant::now();
        record.timestamps.push(now);
        record.last_call_time = Some(now);
        debug!(key, calls_last_24h = record.timestamps.len(), "Call recorded");
    }

    /// Usage counts for one resource key.
    pub async fn stats(&self, key: &str) -> RateStats {
        let records = self.records.lock().await;
        let Some(record) = records.get(key) else {
            return RateStats { hour: 0, day: 0, total: 0 };
        };

        let now = Instant::now();
        RateStats {
            hour: record.timestamps.iter().filter(|ts| now - **ts < HOUR).count(),
            day: record.timestamps.iter().filter(|ts| now - **ts < DAY).count(),
            total: record.timestamps.len(),
        }
    }

    /// Aggregated counts across every key this limiter has seen.
    pub async fn global_stats(&self) -> GlobalRateStats {
        let records = self.records.lock().await;
        let now = Instant::now();

        let mut stats = GlobalRateStats {
            total_calls_last_hour: 0,
            total_calls_last_day: 0,
            total_calls_all_time: 0,
            keys_tracked: records.len(),
        };

        for record in records.values() {
            stats.total_calls_last_hour +=
                record.timestamps.iter().filter(|ts| now - **ts < HOUR).count();
            stats.total_calls_last_day +=
                record.timestamps.iter().filter(|ts| now - **ts < DAY).count();
            stats.total_calls_all_time += record.timestamps.len();
        }

        stats
    }

    /// Clear one key's call history, or all of them.
    pub async fn reset(&self, key: Option<&str>) {
        let mut records = self.records.lock().await;
        match key {
            Some(key) => {
                records.remove(key);
                info!(key, "Rate limit reset");
            }
            None => {
                records.clear();
                info!("All rate limits reset");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            max_calls_per_hour: 100,
            max_calls_per_day: 1000,
            min_delay_between_calls: Duration::ZERO,
            max_concurrent_calls: 1,
            enable_random_human_delay: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enforces_minimum_delay_between_calls() {
        let limiter = ResourceRateLimiter::new(RateLimitConfig {
            min_delay_between_calls: Duration::from_secs(30),
            ..fast_config()
        });

        let start = Instant::now();
        drop(limiter.acquire("agent-a").await);
        drop(limiter.acquire("agent-a").await);

        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn third_call_blocks_until_hourly_window_frees() {
        let limiter = ResourceRateLimiter::new(RateLimitConfig {
            max_calls_per_hour: 2,
            max_concurrent_calls: 5,
            ..fast_config()
        });

        drop(limiter.acquire("agent-a").await);
        drop(limiter.acquire("agent-a").await);

        let stats = limiter.stats("agent-a").await;
        assert_eq!(stats.hour, 2);

        let start = Instant::now();
        drop(limiter.acquire("agent-a").await);
        // Must have waited out the rest of the rolling hour (+1s slack).
        assert!(start.elapsed() >= Duration::from_secs(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_accounting_is_per_key() {
        let limiter = ResourceRateLimiter::new(RateLimitConfig {
            max_calls_per_hour: 1,
            max_concurrent_calls: 5,
            ..fast_config()
        });

        let start = Instant::now();
        drop(limiter.acquire("agent-a").await);
        drop(limiter.acquire("agent-b").await);
        // Different keys never block each other's rate accounting.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn concurrency_slots_shared_across_keys() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let limiter = Arc::new(ResourceRateLimiter::new(RateLimitConfig {
            max_concurrent_calls: 2,
            ..fast_config()
        }));

        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            let current = current.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("agent-{}", i % 2);
                let _permit = limiter.acquire(&key).await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn dropped_permit_frees_slot_after_error() {
        let limiter = Arc::new(ResourceRateLimiter::new(fast_config()));

        async fn failing_call(limiter: &ResourceRateLimiter) -> anyhow::Result<()> {
            let _permit = limiter.acquire("agent-a").await;
            anyhow::bail!("provider exploded mid-call");
        }

        assert!(failing_call(&limiter).await.is_err());

        // A second acquire must not deadlock on the leaked slot.
        let acquired = tokio::time::timeout(Duration::from_secs(1), limiter.acquire("agent-a"))
            .await
            .is_ok();
        assert!(acquired);
    }

    #[tokio::test]
    async fn reset_clears_one_key_without_touching_others() {
        let limiter = ResourceRateLimiter::new(fast_config());
        drop(limiter.acquire("agent-a").await);
        drop(limiter.acquire("agent-b").await);

        limiter.reset(Some("agent-a")).await;
        assert_eq!(limiter.stats("agent-a").await.total, 0);
        assert_eq!(limiter.stats("agent-b").await.total, 1);

        limiter.reset(None).await;
        assert_eq!(limiter.stats("agent-b").await.total, 0);
        assert_eq!(limiter.global_stats().await.keys_tracked, 0);
    }
}
