//! Proactive cache warming.
//!
//! Inserting a cache entry can schedule derivative work: a cached route
//! warms traffic data for its segments, a cached geocoding result warms
//! the reverse lookup. Jobs queue with a priority and are processed by a
//! background scheduler through the same governed dispatch path as live
//! requests, so warming can never bust a quota.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::instrument;

use crate::cache::CacheStore;
use crate::gateway::{Dispatch, Dispatcher};
use crate::telemetry;
use crate::types::{CacheOptions, ProviderRequest};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INTER_JOB_DELAY: Duration = Duration::from_millis(500);
const QUOTA_RETRY_DELAY: Duration = Duration::from_secs(300);
const FAILURE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Lifecycle state of a warming job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One queued warming request. Lower `priority` runs first.
#[derive(Debug, Clone)]
pub struct WarmingJob {
    pub id: u64,
    pub fingerprint: String,
    /// 0 is most urgent. Route-derived traffic jobs use 7, reverse
    /// geocoding jobs use 8.
    pub priority: u8,
    pub request: ProviderRequest,
    pub options: CacheOptions,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    /// Earliest time the job may run; pushed forward on retry.
    pub execute_after: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Queue counters for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmingReport {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-process priority queue of warming jobs.
#[derive(Debug, Default)]
pub struct WarmingQueue {
    jobs: Mutex<Vec<WarmingJob>>,
    next_id: AtomicU64,
}

impl WarmingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job unless one is already pending for the same fingerprint.
    /// Returns the job id, or `None` when deduplicated away.
    pub fn enqueue(
        &self,
        request: ProviderRequest,
        options: CacheOptions,
        priority: u8,
    ) -> Option<u64> {
        let fingerprint = request.fingerprint();
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let duplicate = jobs.iter().any(|job| {
            job.fingerprint == fingerprint
                && matches!(job.status, JobStatus::Pending | JobStatus::Processing)
        });
        if duplicate {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Utc::now();
        jobs.push(WarmingJob {
            id,
            fingerprint,
            priority,
            request,
            options,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_at: now,
            execute_after: now,
            last_error: None,
        });
        Some(id)
    }

    /// Claim up to `n` runnable jobs, most urgent first, marking them
    /// `Processing`.
    pub fn next_batch(&self, n: usize, now: DateTime<Utc>) -> Vec<WarmingJob> {
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut runnable: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| {
                job.status == JobStatus::Pending
                    && job.execute_after <= now
                    && job.attempts < job.max_attempts
            })
            .map(|(i, _)| i)
            .collect();
        runnable.sort_by_key(|&i| (jobs[i].priority, jobs[i].scheduled_at));
        runnable.truncate(n);

        let mut batch = Vec::with_capacity(runnable.len());
        for i in runnable {
            jobs[i].status = JobStatus::Processing;
            batch.push(jobs[i].clone());
        }
        batch
    }

    pub fn complete(&self, id: u64) {
        self.transition(id, |job| {
            job.status = JobStatus::Completed;
            job.last_error = None;
        });
        metrics::counter!(telemetry::WARMING_JOBS_TOTAL, "status" => "completed").increment(1);
    }

    /// Record a failed attempt. The job returns to `Pending` with a
    /// deferred `execute_after` until its attempts run out.
    pub fn fail(&self, id: u64, reason: &str, retry_delay: Duration) {
        let mut terminal = false;
        self.transition(id, |job| {
            job.attempts += 1;
            job.last_error = Some(reason.to_string());
            if job.attempts < job.max_attempts {
                job.status = JobStatus::Pending;
                job.execute_after = Utc::now()
                    + chrono::Duration::from_std(retry_delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
            } else {
                job.status = JobStatus::Failed;
                terminal = true;
            }
        });
        if terminal {
            metrics::counter!(telemetry::WARMING_JOBS_TOTAL, "status" => "failed").increment(1);
        }
    }

    /// Return a claimed job to `Pending` without consuming an attempt,
    /// used when a batch is interrupted rather than failing.
    pub fn release(&self, id: u64) {
        self.transition(id, |job| {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Pending;
            }
        });
    }

    fn transition(&self, id: u64, mutate: impl FnOnce(&mut WarmingJob)) {
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
            mutate(job);
        }
    }

    pub fn report(&self) -> WarmingReport {
        let jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut report = WarmingReport::default();
        for job in jobs.iter() {
            match job.status {
                JobStatus::Pending => report.pending += 1,
                JobStatus::Processing => report.processing += 1,
                JobStatus::Completed => report.completed += 1,
                JobStatus::Failed => report.failed += 1,
            }
        }
        report
    }
}

/// Drains the warming queue through the governed dispatcher.
pub struct WarmingScheduler {
    queue: Arc<WarmingQueue>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<CacheStore>,
    inter_job_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl WarmingScheduler {
    pub fn new(
        queue: Arc<WarmingQueue>,
        dispatcher: Arc<Dispatcher>,
        cache: Arc<CacheStore>,
        inter_job_delay: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            cache,
            inter_job_delay: inter_job_delay.unwrap_or(DEFAULT_INTER_JOB_DELAY),
            shutdown,
        }
    }

    /// Process one batch of warming jobs. Returns how many completed.
    #[instrument(skip(self))]
    pub async fn run_batch(&self, batch_size: usize) -> usize {
        let batch = self.queue.next_batch(batch_size, Utc::now());
        let mut completed = 0;
        let mut first = true;
        for job in batch {
            if *self.shutdown.borrow() {
                // Put the claim back so a later run picks the job up.
                self.queue.release(job.id);
                continue;
            }
            if !first {
                tokio::time::sleep(self.inter_job_delay).await;
            }
            first = false;

            match self.dispatcher.fetch_governed(&job.request).await {
                Ok(Dispatch::Fetched(response)) => {
                    if let Err(err) = self
                        .cache
                        .insert(
                            &job.fingerprint,
                            job.request.kind,
                            response.payload,
                            &job.options,
                            response.provider,
                            response.confidence,
                        )
                        .await
                    {
                        tracing::warn!(job = job.id, error = %err, "warmed entry not cached");
                    }
                    self.queue.complete(job.id);
                    completed += 1;
                }
                Ok(Dispatch::Denied(decision)) => {
                    let delay = decision.retry_after.unwrap_or(QUOTA_RETRY_DELAY);
                    self.queue.fail(job.id, "quota denied", delay);
                }
                Err(err) => {
                    self.queue.fail(job.id, &err.to_string(), FAILURE_RETRY_DELAY);
                }
            }
        }
        completed
    }

    /// Run batches on an interval until shutdown is signalled.
    pub async fn run_loop(self, interval: Duration, batch_size: usize) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_batch(batch_size).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("warming scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheKind, Provider};
    use serde_json::json;

    fn request(n: u32) -> ProviderRequest {
        ProviderRequest::new(
            Provider::GoogleMaps,
            CacheKind::Traffic,
            "/traffic",
            json!({"segment": n}),
        )
    }

    #[test]
    fn duplicate_pending_fingerprints_are_collapsed() {
        let queue = WarmingQueue::new();
        assert!(queue.enqueue(request(1), Default::default(), 7).is_some());
        assert!(queue.enqueue(request(1), Default::default(), 7).is_none());
        assert!(queue.enqueue(request(2), Default::default(), 7).is_some());
        assert_eq!(queue.report().pending, 2);
    }

    #[test]
    fn batches_come_out_in_priority_order() {
        let queue = WarmingQueue::new();
        queue.enqueue(request(1), Default::default(), 8);
        queue.enqueue(request(2), Default::default(), 7);
        queue.enqueue(request(3), Default::default(), 9);

        let batch = queue.next_batch(2, Utc::now());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].priority, 7);
        assert_eq!(batch[1].priority, 8);
        // Claimed jobs are no longer pending.
        assert_eq!(queue.report().processing, 2);
    }

    #[test]
    fn failed_jobs_retry_until_attempts_run_out() {
        let queue = WarmingQueue::new();
        let id = queue.enqueue(request(1), Default::default(), 7).unwrap();

        for _ in 0..2 {
            queue.fail(id, "upstream 503", Duration::ZERO);
            assert_eq!(queue.report().pending, 1);
        }
        queue.fail(id, "upstream 503", Duration::ZERO);
        let report = queue.report();
        assert_eq!(report.pending, 0);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn deferred_jobs_stay_out_of_the_batch() {
        let queue = WarmingQueue::new();
        let id = queue.enqueue(request(1), Default::default(), 7).unwrap();
        queue.fail(id, "quota denied", Duration::from_secs(300));

        assert!(queue.next_batch(10, Utc::now()).is_empty());
        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(queue.next_batch(10, later).len(), 1);
    }
}
