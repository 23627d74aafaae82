//! Job scheduler: daily firing of the pipeline tasks.
//!
//! Built on a monotonic timer and per-job mutual exclusion rather than a
//! cron runtime. A failing job is logged and never halts the scheduler; a
//! firing that collides with the same job still running is dropped with a
//! warning, not queued. Manual triggers run out-of-band under the same
//! no-overlap rule. The last N job outcomes are retained for introspection.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::infrastructure::config::ScheduleConfig;
use crate::pipeline::{EtlPipeline, RunOutcome};

/// The two scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobId {
    PriceCrawl,
    RedditCollection,
}

impl JobId {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::PriceCrawl => "price-crawl",
            JobId::RedditCollection => "reddit-collection",
        }
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one job execution, kept in the bounded history.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: JobId,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Next occurrence of `hour:minute` (UTC) strictly after `now`.
pub fn next_fire(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

struct JobGuard {
    set: Arc<StdMutex<HashSet<JobId>>>,
    job: JobId,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.job);
        }
    }
}

pub struct JobScheduler {
    pipeline: Arc<EtlPipeline>,
    schedule: ScheduleConfig,
    in_flight: Arc<StdMutex<HashSet<JobId>>>,
    history: StdMutex<VecDeque<JobOutcome>>,
    /// Stops the firing loops without touching in-flight work.
    fire_cancel: CancellationToken,
    /// Cancels in-flight job work once the grace period expires.
    work_cancel: CancellationToken,
    started: AtomicBool,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(pipeline: Arc<EtlPipeline>, schedule: ScheduleConfig) -> Self {
        Self {
            pipeline,
            schedule,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            history: StdMutex::new(VecDeque::new()),
            fire_cancel: CancellationToken::new(),
            work_cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Launch the firing loops. Calling again while running is a no-op.
    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler is already running");
            return;
        }

        info!(
            "Starting scheduler: price-crawl at {:02}:{:02} UTC, reddit-collection at {:02}:{:02} UTC",
            self.schedule.price_crawl_hour,
            self.schedule.price_crawl_minute,
            self.schedule.reddit_crawl_hour,
            self.schedule.reddit_crawl_minute
        );

        let jobs = [
            (
                JobId::PriceCrawl,
                self.schedule.price_crawl_hour,
                self.schedule.price_crawl_minute,
            ),
            (
                JobId::RedditCollection,
                self.schedule.reddit_crawl_hour,
                self.schedule.reddit_crawl_minute,
            ),
        ];

        let mut handles = Vec::with_capacity(jobs.len());
        for (job, hour, minute) in jobs {
            let scheduler = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                scheduler.firing_loop(job, hour, minute).await;
            }));
        }
        if let Ok(mut slot) = self.handles.lock() {
            *slot = handles;
        }
    }

    async fn firing_loop(self: Arc<Self>, job: JobId, hour: u32, minute: u32) {
        loop {
            let now = Utc::now();
            let next = next_fire(now, hour, minute);
            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            info!("Job {job} next fires at {next}");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.trigger(job).await;
                }
                _ = self.fire_cancel.cancelled() => {
                    info!("Firing loop for {job} stopped");
                    return;
                }
            }
        }
    }

    /// Fire a job now. Returns false when the same job is still running and
    /// the firing was dropped.
    pub async fn trigger(&self, job: JobId) -> bool {
        let Some(_guard) = self.try_begin(job) else {
            warn!("Job {job} is still running, dropping this firing");
            return false;
        };

        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Executing job {job} (execution {execution_id})");

        let outcome = match job {
            JobId::PriceCrawl => self.pipeline.run_price_only(&self.work_cancel).await,
            JobId::RedditCollection => self.pipeline.run_signals_only(&self.work_cancel).await,
        };

        let finished_at = Utc::now();
        let (success, error) = match &outcome {
            RunOutcome::Completed(stats) => (stats.success, stats.fatal_error.clone()),
            RunOutcome::Skipped { .. } => (false, Some("pipeline busy, firing dropped".into())),
        };

        if success {
            info!(
                "Job {job} completed in {:.2}s",
                (finished_at - started_at).num_milliseconds() as f64 / 1000.0
            );
        } else {
            // A failing job must not take the scheduler down with it.
            error!(
                "Job {job} failed: {}",
                error.as_deref().unwrap_or("unknown error")
            );
        }

        self.record(JobOutcome {
            job,
            execution_id,
            started_at,
            finished_at,
            success,
            error,
        });
        true
    }

    fn try_begin(&self, job: JobId) -> Option<JobGuard> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(job) {
            return None;
        }
        Some(JobGuard {
            set: self.in_flight.clone(),
            job,
        })
    }

    fn record(&self, outcome: JobOutcome) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(outcome);
            while history.len() > self.schedule.history_limit {
                history.pop_front();
            }
        }
    }

    /// Latest job outcomes, newest first.
    pub fn recent_history(&self, limit: usize) -> Vec<JobOutcome> {
        match self.history.lock() {
            Ok(history) => history.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop firing, wait for in-flight jobs to settle within the configured
    /// grace period, then cancel remaining work.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            warn!("Scheduler is not running");
            return;
        }

        info!("Stopping scheduler…");
        self.fire_cancel.cancel();

        let grace = Duration::from_secs(self.schedule.stop_grace_seconds);
        let settled = tokio::time::timeout(grace, self.wait_for_idle()).await.is_ok();
        if !settled {
            warn!("Grace period expired with jobs still in flight, cancelling work");
            self.work_cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), self.wait_for_idle()).await;
        }

        let handles = match self.handles.lock() {
            Ok(mut slot) => std::mem::take(&mut *slot),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("Firing loop did not exit in time");
            }
        }
        info!("Scheduler stopped");
    }

    async fn wait_for_idle(&self) {
        loop {
            let idle = self
                .in_flight
                .lock()
                .map(|set| set.is_empty())
                .unwrap_or(true);
            if idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_fire_today_when_time_is_ahead() {
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 8, 0, 0).unwrap();
        let next = next_fire(now, 9, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_tomorrow_when_time_has_passed() {
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 9, 30, 0).unwrap();
        let next = next_fire(now, 9, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 8, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_skips_exact_now() {
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap();
        let next = next_fire(now, 9, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 8, 2, 9, 0, 0).unwrap());
    }
}
