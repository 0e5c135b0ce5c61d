//! Process-wide gate for heavy pipeline jobs.
//!
//! Bounds how many enrichment jobs run at once regardless of which resource
//! they call, and optionally spaces out job starts. One instance is shared
//! by every caller in the process; there is no cross-process coordination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};

use clientpulse_common::JobLimiterSettings;

type ActiveJobs = Arc<StdMutex<HashMap<String, Instant>>>;

pub struct GlobalJobLimiter {
    settings: JobLimiterSettings,
    semaphore: Arc<Semaphore>,
    /// Serializes the moment-of-start so spacing holds even when several
    /// concurrency slots are free.
    start_gate: Mutex<()>,
    active: ActiveJobs,
}

/// RAII permit for one running job. Dropping it deregisters the job and
/// releases the slot, on every exit path.
pub struct JobPermit {
    job_name: String,
    started: Instant,
    active: ActiveJobs,
    _permit: OwnedSemaphorePermit,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.job_name);
        }
        debug!(
            job = self.job_name.as_str(),
            duration_secs = self.started.elapsed().as_secs_f64(),
            "Job finished"
        );
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobLimiterStats {
    pub max_concurrent_jobs: usize,
    pub current_active_jobs: usize,
    pub available_slots: usize,
}

impl GlobalJobLimiter {
    pub fn new(settings: JobLimiterSettings) -> Self {
        info!(
            max_concurrent_jobs = settings.max_concurrent_jobs,
            min_delay_between_jobs = settings.min_delay_between_jobs,
            "Global job limiter initialized"
        );
        Self {
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
            start_gate: Mutex::new(()),
            active: Arc::new(StdMutex::new(HashMap::new())),
            settings,
        }
    }

    /// Limiter configured from the environment, falling back to safe
    /// defaults on any load error.
    pub fn from_env() -> Self {
        Self::new(JobLimiterSettings::from_env())
    }

    /// Wait for a job slot, apply start spacing, register the job as active.
    pub async fn acquire(&self, job_name: &str) -> JobPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("job limiter semaphore closed");
        debug!(
            job = job_name,
            available = self.semaphore.available_permits(),
            max = self.settings.max_concurrent_jobs,
            "Job slot acquired"
        );

        if self.settings.min_delay_between_jobs > 0.0 {
            let _gate = self.start_gate.lock().await;
            debug!(
                job = job_name,
                delay_secs = self.settings.min_delay_between_jobs,
                "Spacing job start"
            );
            tokio::time::sleep(Duration::from_secs_f64(self.settings.min_delay_between_jobs))
                .await;
        }

        let started = Instant::now();
        self.active
            .lock()
            .expect("active job registry poisoned")
            .insert(job_name.to_string(), started);

        JobPermit {
            job_name: job_name.to_string(),
            started,
            active: self.active.clone(),
            _permit: permit,
        }
    }

    pub fn stats(&self) -> JobLimiterStats {
        JobLimiterStats {
            max_concurrent_jobs: self.settings.max_concurrent_jobs,
            current_active_jobs: self
                .active
                .lock()
                .expect("active job registry poisoned")
                .len(),
            available_slots: self.semaphore.available_permits(),
        }
    }

    /// Force-clear the active-job registry. This is registry hygiene for
    /// debugging only: the semaphore is untouched, so slots held by jobs
    /// still in flight stay held and `stats()` may disagree with true
    /// availability until those jobs finish.
    pub fn reset(&self) {
        self.active
            .lock()
            .expect("active job registry poisoned")
            .clear();
        info!("Global job limiter registry reset");
    }
}
