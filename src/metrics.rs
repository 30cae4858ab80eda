// Job metrics module
//
// Lightweight counters for job outcomes and workspace housekeeping

use crate::models::JobOutcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Job metrics shared by the controller and the front end
///
/// Uses atomic operations for thread-safe tracking without locks.
/// Logged on shutdown with [`Metrics::log_summary`].
#[derive(Debug)]
pub struct Metrics {
    pub jobs_started: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_suspended: AtomicU64,
    pub jobs_killed: AtomicU64,

    /// Stale workspaces that were deleted before a job
    pub workspaces_cleaned: AtomicU64,

    /// Workspace warnings (permission denied, missing resume workspace)
    pub workspace_warnings: AtomicU64,

    /// Completion notifications delivered, one per finished job
    pub notifications_emitted: AtomicU64,

    /// Wall time spent in pipeline runs, in milliseconds
    pub total_run_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_suspended: AtomicU64::new(0),
            jobs_killed: AtomicU64::new(0),
            workspaces_cleaned: AtomicU64::new(0),
            workspace_warnings: AtomicU64::new(0),
            notifications_emitted: AtomicU64::new(0),
            total_run_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_killed(&self) {
        self.jobs_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workspace_cleaned(&self) {
        self.workspaces_cleaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workspace_warning(&self) {
        self.workspace_warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal outcome of a job together with its run time
    pub fn record_outcome(&self, outcome: &JobOutcome, run_time: Duration) {
        let counter = match outcome {
            JobOutcome::Completed => &self.jobs_completed,
            JobOutcome::Failed { .. } => &self.jobs_failed,
            JobOutcome::Suspended { .. } => &self.jobs_suspended,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.notifications_emitted.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_ms
            .fetch_add(run_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn notifications(&self) -> u64 {
        self.notifications_emitted.load(Ordering::Relaxed)
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average run time of finished jobs in milliseconds
    pub fn avg_run_time_ms(&self) -> f64 {
        let total = self.total_run_time_ms.load(Ordering::Relaxed);
        let count = self.notifications_emitted.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Job Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Jobs: {} started, {} completed, {} failed, {} suspended, {} killed",
            self.jobs_started.load(Ordering::Relaxed),
            self.jobs_completed.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.jobs_suspended.load(Ordering::Relaxed),
            self.jobs_killed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Workspaces: {} cleaned, {} warnings",
            self.workspaces_cleaned.load(Ordering::Relaxed),
            self.workspace_warnings.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Run time: {:.2}s total (avg: {:.2}ms per job)",
            self.total_run_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_run_time_ms()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
