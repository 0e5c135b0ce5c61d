//! Concurrency properties of the global job limiter under contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clientpulse_common::JobLimiterSettings;
use clientpulse_enrich::limits::GlobalJobLimiter;

fn settings(max_jobs: usize, min_delay: f64) -> JobLimiterSettings {
    JobLimiterSettings {
        max_concurrent_jobs: max_jobs,
        min_delay_between_jobs: min_delay,
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_jobs_never_exceed_the_limit() {
    let limiter = Arc::new(GlobalJobLimiter::new(settings(2, 0.0)));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..5 {
        let limiter = limiter.clone();
        let running = running.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire(&format!("job-{i}")).await;

            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_secs(1)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2, "more than 2 jobs ran at once");
    assert_eq!(limiter.stats().available_slots, 2);
}

#[tokio::test(start_paused = true)]
async fn job_starts_are_spaced_by_the_minimum_delay() {
    let limiter = Arc::new(GlobalJobLimiter::new(settings(3, 2.0)));
    let starts = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..3 {
        let limiter = limiter.clone();
        let starts = starts.clone();
        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire(&format!("job-{i}")).await;
            starts.lock().unwrap().push(tokio::time::Instant::now());
            tokio::time::sleep(Duration::from_secs(10)).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut starts = starts.lock().unwrap().clone();
    starts.sort();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(2), "start gap {gap:?} below minimum");
    }
}

#[tokio::test]
async fn panicked_job_releases_its_slot() {
    let limiter = Arc::new(GlobalJobLimiter::new(settings(1, 0.0)));

    let handle = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let _permit = limiter.acquire("doomed").await;
            panic!("job blew up");
        })
    };
    assert!(handle.await.is_err());

    // The slot must be free again or this would hang.
    let _permit = limiter.acquire("successor").await;
    let stats = limiter.stats();
    assert_eq!(stats.current_active_jobs, 1);
    assert_eq!(stats.available_slots, 0);
}
