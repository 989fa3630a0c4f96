//! C6 — job registry (spec §4.6). A queued/running/completed/failed/
//! cancelled state machine with a per-user concurrency cap, a FIFO queue
//! per user for submissions beyond the cap, and cooperative cancellation.
//! Grounded on `original_source/.../engine.py`'s job-manager half
//! (submit/status/cancel) and on the teacher's preference for plain
//! `std::thread`/`std::sync` primitives over an async runtime — nothing in
//! the retrieval pack reaches for `tokio` outside of unrelated network-service
//! code, so the worker here is a detached OS thread per job rather than a
//! task on an async executor.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crate::config::ServiceConfig;
use crate::engine::{CancellationToken, JobSpec, ProgressReport, Results, SimulationEngine};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, ProgressEvent};
use crate::types::{JobId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

struct JobRecord {
    owner: UserId,
    status: JobStatus,
    /// Present only while `Queued`; taken by the dispatcher when the job is
    /// admitted to `Running`.
    spec: Option<JobSpec>,
    cancel: CancellationToken,
    submitted_at: Instant,
    results: Option<Results>,
    error: Option<String>,
}

impl JobRecord {
    fn check_owner(&self, requester: UserId) -> CoreResult<()> {
        if self.owner != requester {
            return Err(CoreError::authorization("requester does not own this job"));
        }
        Ok(())
    }
}

/// In-memory job registry. One instance is shared (behind `Arc`) across
/// whatever serves the external API; every method here is safe to call
/// concurrently from multiple callers.
pub struct JobRegistry {
    config: ServiceConfig,
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    running_per_user: Mutex<HashMap<UserId, usize>>,
    queues: Mutex<HashMap<UserId, VecDeque<JobId>>>,
    next_id: AtomicU64,
    events: Arc<EventBus>,
}

impl JobRegistry {
    pub fn new(config: ServiceConfig, events: Arc<EventBus>) -> Self {
        JobRegistry {
            config,
            jobs: Mutex::new(HashMap::new()),
            running_per_user: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Submit a job for `owner` (spec §4.6): validates, creates a `Queued`
    /// record, and enqueues it. Submissions beyond
    /// `max_concurrent_jobs_per_user` stay `Queued` rather than being
    /// rejected — the dispatcher admits the oldest queued job for a user as
    /// soon as a running slot frees up.
    pub fn submit(self: &Arc<Self>, owner: UserId, spec: JobSpec) -> CoreResult<JobId> {
        spec.validate()?;

        let job_id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.insert(
                job_id,
                JobRecord {
                    owner,
                    status: JobStatus::Queued,
                    spec: Some(spec),
                    cancel,
                    submitted_at: Instant::now(),
                    results: None,
                    error: None,
                },
            );
        }
        self.queues.lock().unwrap().entry(owner).or_default().push_back(job_id);
        self.events.publish(owner, ProgressEvent::JobQueued { job_id });

        self.dispatch(owner);

        Ok(job_id)
    }

    /// Admit as many queued jobs for `owner` as the concurrency cap allows.
    /// Called after every submission and after every job's terminal
    /// transition, so a freed slot is picked up immediately.
    fn dispatch(self: &Arc<Self>, owner: UserId) {
        loop {
            let job_id = {
                let mut running = self.running_per_user.lock().unwrap();
                let count = running.entry(owner).or_insert(0);
                if *count >= self.config.max_concurrent_jobs_per_user {
                    return;
                }
                let mut queues = self.queues.lock().unwrap();
                let Some(job_id) = queues.entry(owner).or_default().pop_front() else {
                    return;
                };
                *count += 1;
                job_id
            };

            let (spec, cancel) = {
                let mut jobs = self.jobs.lock().unwrap();
                let record = jobs.get_mut(&job_id).expect("dispatched job must have a record");
                let spec = record.spec.take().expect("queued record must carry its spec");
                record.status = JobStatus::Running;
                (spec, record.cancel.clone())
            };
            self.events.publish(owner, ProgressEvent::JobStatus { job_id, status: JobStatus::Running.as_str().to_string() });

            let registry = Arc::clone(self);
            let timeout_cancel = cancel.clone();
            thread::spawn(move || registry.run_job(job_id, owner, spec, cancel));

            let registry = Arc::clone(self);
            let soft_timeout = self.config.job_soft_timeout;
            thread::spawn(move || registry.enforce_soft_timeout(job_id, soft_timeout, timeout_cancel));
        }
    }

    /// Soft timeout (spec §5, SPEC_FULL §10.3): cancels a job still running
    /// after `soft_timeout` rather than letting it run unbounded. "Soft"
    /// because cancellation is cooperative, same as a user-initiated
    /// `cancel()` — the worker still finishes its current iteration.
    fn enforce_soft_timeout(&self, job_id: JobId, soft_timeout: std::time::Duration, cancel: CancellationToken) {
        thread::sleep(soft_timeout);
        if !cancel.is_cancelled() && self.status_unchecked(job_id).map(|s| !s.is_terminal()).unwrap_or(false) {
            log::warn!("job {} exceeded soft timeout of {:?}, cancelling", job_id.0, soft_timeout);
            cancel.cancel();
        }
    }

    fn run_job(self: Arc<Self>, job_id: JobId, owner: UserId, spec: JobSpec, cancel: CancellationToken) {
        let bus = Arc::clone(&self.events);
        let progress_cb = move |report: ProgressReport| {
            bus.publish(owner, ProgressEvent::progress(job_id, report));
        };

        let outcome = SimulationEngine::run(&spec, &self.config, Some(&progress_cb), &cancel);

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(record) = jobs.get_mut(&job_id) {
            match outcome {
                Ok(results) => {
                    record.status = JobStatus::Completed;
                    record.results = Some(results.clone());
                    drop(jobs);
                    self.events.publish(owner, ProgressEvent::completed(job_id, &results));
                }
                Err(CoreError::Cancelled { completed_iterations }) => {
                    record.status = JobStatus::Cancelled;
                    drop(jobs);
                    self.events.publish(owner, ProgressEvent::JobCancelled { job_id, completed_iterations });
                }
                Err(e) => {
                    record.status = JobStatus::Failed;
                    record.error = Some(e.to_string());
                    drop(jobs);
                    log::error!("job {} failed: {}", job_id.0, e);
                    self.events.publish(owner, ProgressEvent::JobFailed { job_id, message: e.to_string() });
                }
            }
        }

        let mut running = self.running_per_user.lock().unwrap();
        if let Some(count) = running.get_mut(&owner) {
            *count = count.saturating_sub(1);
        }
        drop(running);

        self.dispatch(owner);
    }

    fn status_unchecked(&self, job_id: JobId) -> CoreResult<JobStatus> {
        self.jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|r| r.status)
            .ok_or_else(|| CoreError::parameter(format!("unknown job id {}", job_id.0)))
    }

    /// `get(job_id, requester)` split by field (spec §4.6): rejects if
    /// `requester` is not the job's owner.
    pub fn status(&self, job_id: JobId, requester: UserId) -> CoreResult<JobStatus> {
        let jobs = self.jobs.lock().unwrap();
        let record = jobs.get(&job_id).ok_or_else(|| CoreError::parameter(format!("unknown job id {}", job_id.0)))?;
        record.check_owner(requester)?;
        Ok(record.status)
    }

    /// Retrieve completed results. Returns `None` while the job is still
    /// queued/running; an error if the job never existed or `requester`
    /// does not own it.
    pub fn results(&self, job_id: JobId, requester: UserId) -> CoreResult<Option<Results>> {
        let jobs = self.jobs.lock().unwrap();
        let record = jobs.get(&job_id).ok_or_else(|| CoreError::parameter(format!("unknown job id {}", job_id.0)))?;
        record.check_owner(requester)?;
        Ok(record.results.clone())
    }

    pub fn error(&self, job_id: JobId, requester: UserId) -> CoreResult<Option<String>> {
        let jobs = self.jobs.lock().unwrap();
        let record = jobs.get(&job_id).ok_or_else(|| CoreError::parameter(format!("unknown job id {}", job_id.0)))?;
        record.check_owner(requester)?;
        Ok(record.error.clone())
    }

    /// Signal cancellation (spec §4.6/§5): directly transitions a queued job
    /// to `cancelled` (it has no worker to signal yet, and is removed from
    /// its user's queue); a running job is signalled cooperatively and the
    /// worker observes it at the next iteration boundary. Terminal jobs
    /// reject.
    pub fn cancel(&self, job_id: JobId, requester: UserId) -> CoreResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let record = jobs.get_mut(&job_id).ok_or_else(|| CoreError::parameter(format!("unknown job id {}", job_id.0)))?;
        record.check_owner(requester)?;
        if record.status.is_terminal() {
            return Err(CoreError::parameter("job already finished"));
        }
        let owner = record.owner;
        if record.status == JobStatus::Queued {
            record.status = JobStatus::Cancelled;
            record.spec = None;
            drop(jobs);
            let mut queues = self.queues.lock().unwrap();
            if let Some(queue) = queues.get_mut(&owner) {
                queue.retain(|id| *id != job_id);
            }
            drop(queues);
            self.events.publish(owner, ProgressEvent::JobCancelled { job_id, completed_iterations: 0 });
        } else {
            record.cancel.cancel();
        }
        Ok(())
    }

    /// Remove a terminal job's record. Errors if the job is still active or
    /// `requester` does not own it.
    pub fn delete(&self, job_id: JobId, requester: UserId) -> CoreResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get(&job_id) {
            Some(record) => {
                record.check_owner(requester)?;
                if !record.status.is_terminal() {
                    return Err(CoreError::parameter("cannot delete an active job"));
                }
                jobs.remove(&job_id);
                Ok(())
            }
            None => Err(CoreError::parameter(format!("unknown job id {}", job_id.0))),
        }
    }

    pub fn elapsed(&self, job_id: JobId, requester: UserId) -> CoreResult<std::time::Duration> {
        let jobs = self.jobs.lock().unwrap();
        let record = jobs.get(&job_id).ok_or_else(|| CoreError::parameter(format!("unknown job id {}", job_id.0)))?;
        record.check_owner(requester)?;
        Ok(record.submitted_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{FrequencyDistribution, SeverityDistribution};
    use crate::engine::EventParams;
    use std::time::Duration;

    fn tiny_spec(name: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            iterations: 200,
            seed: Some(1),
            event_params: EventParams {
                frequency: FrequencyDistribution::Poisson { lambda: 1.5 },
                severity: SeverityDistribution::Lognormal { mu: 9.0, sigma: 1.0 },
            },
            portfolio: None,
            apply_deductibles: false,
            apply_limits: false,
            apply_reinsurance: false,
            reinsurance_config: Default::default(),
            max_events_per_iteration: 50,
            convergence_check: Default::default(),
            batch_size: 50,
            parallel_processing: false,
            max_workers: None,
            save_raw_losses: false,
            calculate_percentiles: false,
            percentile_levels: vec![],
        }
    }

    fn big_spec(name: &str) -> JobSpec {
        let mut spec = tiny_spec(name);
        spec.iterations = 2_000_000;
        spec.batch_size = 1000;
        spec
    }

    fn wait_for_terminal(registry: &Arc<JobRegistry>, job_id: JobId, owner: UserId) -> JobStatus {
        for _ in 0..200 {
            let status = registry.status(job_id, owner).unwrap();
            if matches!(status, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled) {
                return status;
            }
            thread::sleep(Duration::from_millis(10));
        }
        registry.status(job_id, owner).unwrap()
    }

    #[test]
    fn submitted_job_eventually_completes_and_yields_results() {
        let registry = Arc::new(JobRegistry::new(ServiceConfig::canonical(), Arc::new(EventBus::new())));
        let job_id = registry.submit(UserId(1), tiny_spec("job-a")).unwrap();
        let status = wait_for_terminal(&registry, job_id, UserId(1));
        assert_eq!(status, JobStatus::Completed);
        assert!(registry.results(job_id, UserId(1)).unwrap().is_some());
    }

    /// Scenario S6 (spec.md:437-438): cap = 1, submit two jobs quickly — the
    /// second is admitted (not rejected), stays `Queued` while the first
    /// runs, then transitions to `Running` once the first finishes.
    #[test]
    fn excess_submissions_queue_instead_of_being_rejected() {
        let mut cfg = ServiceConfig::canonical();
        cfg.max_concurrent_jobs_per_user = 1;
        let registry = Arc::new(JobRegistry::new(cfg, Arc::new(EventBus::new())));

        let first = registry.submit(UserId(9), big_spec("job-big")).unwrap();
        let second = registry.submit(UserId(9), tiny_spec("job-b")).unwrap();

        assert_eq!(registry.status(second, UserId(9)).unwrap(), JobStatus::Queued);

        registry.cancel(first, UserId(9)).unwrap();
        let second_status = wait_for_terminal(&registry, second, UserId(9));
        assert_eq!(second_status, JobStatus::Completed);
    }

    #[test]
    fn cancelling_a_queued_job_removes_it_without_running_it() {
        let mut cfg = ServiceConfig::canonical();
        cfg.max_concurrent_jobs_per_user = 1;
        let registry = Arc::new(JobRegistry::new(cfg, Arc::new(EventBus::new())));

        let _first = registry.submit(UserId(3), big_spec("job-slow")).unwrap();
        let second = registry.submit(UserId(3), tiny_spec("job-queued")).unwrap();
        assert_eq!(registry.status(second, UserId(3)).unwrap(), JobStatus::Queued);

        registry.cancel(second, UserId(3)).unwrap();
        assert_eq!(registry.status(second, UserId(3)).unwrap(), JobStatus::Cancelled);
    }

    #[test]
    fn deleting_an_active_job_is_rejected() {
        let registry = Arc::new(JobRegistry::new(ServiceConfig::canonical(), Arc::new(EventBus::new())));
        let job_id = registry.submit(UserId(1), big_spec("job-slow")).unwrap();
        assert!(registry.delete(job_id, UserId(1)).is_err());
        registry.cancel(job_id, UserId(1)).unwrap();
    }

    #[test]
    fn unknown_job_id_is_an_error_everywhere() {
        let registry = Arc::new(JobRegistry::new(ServiceConfig::canonical(), Arc::new(EventBus::new())));
        assert!(registry.status(JobId(999), UserId(1)).is_err());
        assert!(registry.cancel(JobId(999), UserId(1)).is_err());
        assert!(registry.delete(JobId(999), UserId(1)).is_err());
    }

    #[test]
    fn a_requester_who_is_not_the_owner_is_rejected_everywhere() {
        let registry = Arc::new(JobRegistry::new(ServiceConfig::canonical(), Arc::new(EventBus::new())));
        let job_id = registry.submit(UserId(1), tiny_spec("job-owned")).unwrap();
        let stranger = UserId(2);

        assert!(registry.status(job_id, stranger).is_err());
        assert!(registry.results(job_id, stranger).is_err());
        assert!(registry.error(job_id, stranger).is_err());
        assert!(registry.cancel(job_id, stranger).is_err());
        assert!(registry.elapsed(job_id, stranger).is_err());

        wait_for_terminal(&registry, job_id, UserId(1));
        assert!(registry.delete(job_id, stranger).is_err());
        assert!(registry.delete(job_id, UserId(1)).is_ok());
    }
}
