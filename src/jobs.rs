//! Asynchronous job lifecycle: submit → solve → complete → mutate →
//! re-solve, with persistent job state.
//!
//! The manager is an explicit value owning the worker pool and the store
//! handle; there is no process-wide registry. Per-job operations are
//! serialized by the status machine: a mutation requires `COMPLETED` and
//! re-enters `SOLVING`, so two operations can never interleave on the
//! same job.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::continuous;
use crate::domain::{Employee, Schedule};
use crate::error::{ErrorRecord, PlanningError, PlanningResult};
use crate::solver::{solve, CancelToken, ScoreSample, SolverConfig};
use crate::store::JobStore;

/// Persistence retry policy: attempts and initial backoff.
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle status of a job.
///
/// ```text
/// SCHEDULED ──► SOLVING ──► COMPLETED
///                  │             │
///                  └──► FAILED   └──► (mutations re-enter SOLVING)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Scheduled,
    Solving,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One submission of a schedule plus all subsequent mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "input")]
    pub input_schedule: Schedule,
    #[serde(rename = "output")]
    pub output_schedule: Option<Schedule>,
    #[serde(rename = "history")]
    pub best_score_history: Vec<ScoreSample>,
    pub error: Option<ErrorRecord>,
}

impl Job {
    pub fn new(input_schedule: Schedule) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Scheduled,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            input_schedule,
            output_schedule: None,
            best_score_history: Vec::new(),
            error: None,
        }
    }

    /// The schedule a mutation operates on: the solved output.
    pub fn solution(&self) -> Option<&Schedule> {
        self.output_schedule.as_ref()
    }
}

/// Worker pool size and solver settings for one manager.
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub workers: usize,
    pub solver: SolverConfig,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            solver: SolverConfig::default(),
        }
    }
}

struct Inner {
    store: Arc<dyn JobStore>,
    jobs: RwLock<HashMap<Uuid, Arc<RwLock<Job>>>>,
    cancels: RwLock<HashMap<Uuid, CancelToken>>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    solver: SolverConfig,
}

/// Owns job identity, status, persistence and the worker pool.
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// Builds the manager, rehydrates persisted jobs and spawns the
    /// worker pool. Must be called within a tokio runtime.
    ///
    /// Jobs persisted as `SOLVING` are flipped to `FAILED` with reason
    /// `interrupted`: in-memory solver state cannot be resumed. Jobs
    /// persisted as `SCHEDULED` are re-enqueued.
    pub fn new(store: Arc<dyn JobStore>, config: JobManagerConfig) -> PlanningResult<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            store,
            jobs: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
            queue_tx,
            solver: config.solver,
        });

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker_id in 0..config.workers {
            let inner = inner.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(worker_loop(inner, queue_rx, worker_id));
        }

        let manager = Self { inner };
        manager.rehydrate()?;
        Ok(manager)
    }

    fn rehydrate(&self) -> PlanningResult<()> {
        let ids = self.inner.store.list_ids()?;
        for id in ids {
            let Some(mut job) = self.inner.store.load(id)? else {
                continue;
            };
            match job.status {
                JobStatus::Solving => {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(Utc::now());
                    job.error = Some(
                        PlanningError::Interrupted {
                            message: "process restarted mid-solve".to_string(),
                        }
                        .to_record(Some(id)),
                    );
                    self.inner.store.save(&job)?;
                    warn!(job_id = %id, "rehydrated interrupted job as FAILED");
                }
                JobStatus::Scheduled => {
                    let _ = self.inner.queue_tx.send(id);
                    info!(job_id = %id, "re-enqueued persisted job");
                }
                _ => {}
            }
            self.inner.jobs.write().insert(id, Arc::new(RwLock::new(job)));
        }
        Ok(())
    }

    fn job_arc(&self, job_id: Uuid) -> PlanningResult<Arc<RwLock<Job>>> {
        self.inner
            .jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or(PlanningError::NotFound { job_id })
    }

    /// Validates and persists a new job, then enqueues it for a worker.
    pub async fn submit(&self, schedule: Schedule) -> PlanningResult<Uuid> {
        schedule.validate()?;
        let job = Job::new(schedule);
        let job_id = job.id;
        self.inner.persist_with_retry(&job).await?;
        self.inner
            .jobs
            .write()
            .insert(job_id, Arc::new(RwLock::new(job)));
        self.inner
            .queue_tx
            .send(job_id)
            .map_err(|_| PlanningError::internal("worker queue closed"))?;
        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub fn get(&self, job_id: Uuid) -> PlanningResult<Job> {
        Ok(self.job_arc(job_id)?.read().clone())
    }

    /// Snapshots of all known jobs, oldest submission first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|job| job.read().clone())
            .collect();
        jobs.sort_by_key(|job| job.submitted_at);
        jobs
    }

    /// Removes a terminal job from the registry and the store.
    pub fn delete(&self, job_id: Uuid) -> PlanningResult<()> {
        let job = self.job_arc(job_id)?;
        {
            let guard = job.read();
            if !guard.status.is_terminal() {
                return Err(PlanningError::invalid_state(format!(
                    "cannot delete job {job_id} in status {:?}",
                    guard.status
                )));
            }
        }
        self.inner.jobs.write().remove(&job_id);
        self.inner.store.delete(job_id)?;
        info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    /// Bulk-deletes terminal jobs older than the cutoff. Returns how many
    /// were removed.
    pub fn cleanup(&self, older_than: Duration) -> PlanningResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| PlanningError::invalid_input(format!("cutoff out of range: {e}")))?;
        let candidates: Vec<Uuid> = self
            .list()
            .into_iter()
            .filter(|job| {
                job.status.is_terminal()
                    && job.completed_at.unwrap_or(job.submitted_at) < cutoff
            })
            .map(|job| job.id)
            .collect();
        let mut deleted = 0;
        for job_id in candidates {
            if self.delete(job_id).is_ok() {
                deleted += 1;
            }
        }
        info!(deleted, "job cleanup finished");
        Ok(deleted)
    }

    /// Cancels a job cooperatively. A job still waiting in the queue
    /// completes immediately with an empty history; a solving job keeps
    /// whatever best score it reached. A user cancel never fails a job.
    pub async fn cancel(&self, job_id: Uuid) -> PlanningResult<()> {
        let job = self.job_arc(job_id)?;
        let became_terminal = {
            let mut guard = job.write();
            match guard.status {
                JobStatus::Scheduled => {
                    guard.status = JobStatus::Completed;
                    guard.completed_at = Some(Utc::now());
                    true
                }
                JobStatus::Solving => {
                    if let Some(token) = self.inner.cancels.read().get(&job_id) {
                        token.cancel();
                    }
                    false
                }
                _ => false,
            }
        };
        if became_terminal {
            if let Err(err) = self.inner.persist_snapshot(&job).await {
                self.inner.fail_job(&job, job_id, &err).await;
                return Err(err);
            }
            info!(job_id = %job_id, "job canceled before solving");
        }
        Ok(())
    }

    /// Appends an employee and re-solves with every clean assignment
    /// pinned. Returns the updated job snapshot.
    pub async fn add_employee(&self, job_id: Uuid, employee: Employee) -> PlanningResult<Job> {
        let job = self.job_arc(job_id)?;
        let (previous, mut working) = {
            let mut guard = job.write();
            let output = claim_for_mutation(&mut guard, job_id)?;
            if output.employees.iter().any(|e| e.id == employee.id) {
                guard.status = JobStatus::Completed;
                return Err(PlanningError::invalid_input(format!(
                    "duplicate employee id '{}'",
                    employee.id
                )));
            }
            let mut working = output.clone();
            working.employees.push(employee.clone());
            working.score = None;
            if let Err(err) = working.validate() {
                guard.status = JobStatus::Completed;
                return Err(err);
            }
            (output, working)
        };
        info!(job_id = %job_id, employee_id = %employee.id, "adding employee");

        let plan = continuous::pin_for_added_employee(&working, &self.inner.solver.evaluator);
        continuous::apply_pin_plan(&mut working, &plan);
        self.resolve_mutation(&job, job_id, previous, working).await
    }

    /// Replaces an employee's skill set and re-solves only the affected
    /// shifts. Returns the updated job snapshot.
    pub async fn update_skills(
        &self,
        job_id: Uuid,
        employee_id: &str,
        new_skills: HashSet<String>,
    ) -> PlanningResult<Job> {
        let job = self.job_arc(job_id)?;
        let (previous, mut working, old_skills) = {
            let mut guard = job.write();
            let output = claim_for_mutation(&mut guard, job_id)?;
            let Some(pos) = output.employees.iter().position(|e| e.id == employee_id) else {
                guard.status = JobStatus::Completed;
                return Err(PlanningError::invalid_input(format!(
                    "unknown employee id '{employee_id}'"
                )));
            };
            let mut working = output.clone();
            let old_skills = working.employees[pos].skills.clone();
            working.employees[pos].skills = new_skills.clone();
            working.score = None;
            if let Err(err) = working.validate() {
                guard.status = JobStatus::Completed;
                return Err(err);
            }
            (output, working, old_skills)
        };
        info!(job_id = %job_id, employee_id, "updating skills");

        let plan =
            continuous::pin_for_skill_update(&working, employee_id, &old_skills, &new_skills);
        continuous::apply_pin_plan(&mut working, &plan);
        self.resolve_mutation(&job, job_id, previous, working).await
    }

    /// Directly reassigns one shift on the stored solution, without
    /// invoking the solver. Rejected with `IllegalMove` if the change
    /// would alter the hard score at all; the job is left untouched.
    pub async fn reassign_shift(
        &self,
        job_id: Uuid,
        shift_id: &str,
        new_assignee: Option<&str>,
    ) -> PlanningResult<Job> {
        let job = self.job_arc(job_id)?;
        {
            let mut guard = job.write();
            if guard.status != JobStatus::Completed {
                return Err(not_completed(&guard, job_id));
            }
            let Some(output) = guard.output_schedule.as_mut() else {
                return Err(PlanningError::internal(format!(
                    "completed job {job_id} has no solution"
                )));
            };
            let score = continuous::reassign(
                output,
                shift_id,
                new_assignee,
                &self.inner.solver.evaluator,
            )?;
            info!(job_id = %job_id, shift_id, score = %score, "shift reassigned");
        }
        if let Err(err) = self.inner.persist_snapshot(&job).await {
            self.inner.fail_job(&job, job_id, &err).await;
            return Err(err);
        }
        let result = job.read().clone();
        Ok(result)
    }

    /// Toggles persistent pins on the stored solution. Pins survive until
    /// explicitly cleared or until the next mutation-driven solve resets
    /// them.
    pub async fn pin_shifts(
        &self,
        job_id: Uuid,
        shift_ids: &[String],
        pin: bool,
    ) -> PlanningResult<Job> {
        let job = self.job_arc(job_id)?;
        {
            let mut guard = job.write();
            if guard.status != JobStatus::Completed {
                return Err(not_completed(&guard, job_id));
            }
            let Some(output) = guard.output_schedule.as_mut() else {
                return Err(PlanningError::internal(format!(
                    "completed job {job_id} has no solution"
                )));
            };
            continuous::pin_shifts(output, shift_ids, pin)?;
        }
        if let Err(err) = self.inner.persist_snapshot(&job).await {
            self.inner.fail_job(&job, job_id, &err).await;
            return Err(err);
        }
        let result = job.read().clone();
        Ok(result)
    }

    /// Runs the pinned re-solve for a mutation and publishes the result.
    /// On solver failure the previous schedule is restored and the job is
    /// marked FAILED. A worse-but-valid score is accepted as-is.
    async fn resolve_mutation(
        &self,
        job: &Arc<RwLock<Job>>,
        job_id: Uuid,
        previous: Schedule,
        working: Schedule,
    ) -> PlanningResult<Job> {
        let token = CancelToken::new();
        self.inner.cancels.write().insert(job_id, token.clone());
        if let Err(err) = self.inner.persist_snapshot(job).await {
            self.inner.cancels.write().remove(&job_id);
            self.inner.fail_job(job, job_id, &err).await;
            return Err(err);
        }

        let solver_config = self.inner.solver.clone();
        let outcome =
            tokio::task::spawn_blocking(move || solve(working, &solver_config, &token)).await;
        self.inner.cancels.write().remove(&job_id);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let err =
                    PlanningError::internal(format!("solver task aborted: {join_err}"));
                {
                    let mut guard = job.write();
                    guard.output_schedule = Some(previous);
                }
                self.inner.fail_job(job, job_id, &err).await;
                return Err(err);
            }
        };

        if let Some(record) = outcome.error {
            let err = PlanningError::internal(record.message.clone());
            {
                let mut guard = job.write();
                guard.output_schedule = Some(previous);
            }
            self.inner.fail_job(job, job_id, &err).await;
            return Err(err);
        }

        let mut result = outcome.schedule;
        continuous::clear_pins(&mut result);
        {
            let mut guard = job.write();
            guard.output_schedule = Some(result);
            guard.best_score_history.extend(outcome.improvements);
            guard.status = JobStatus::Completed;
            guard.completed_at = Some(Utc::now());
        }
        if let Err(err) = self.inner.persist_snapshot(job).await {
            self.inner.fail_job(job, job_id, &err).await;
            return Err(err);
        }
        info!(job_id = %job_id, score = %outcome.best_score, "mutation re-solve completed");
        Ok(job.read().clone())
    }
}

/// Checks the mutation precondition and atomically claims the job by
/// moving it to SOLVING. Callers must restore COMPLETED on early
/// validation failure.
fn claim_for_mutation(
    guard: &mut parking_lot::RwLockWriteGuard<'_, Job>,
    job_id: Uuid,
) -> PlanningResult<Schedule> {
    if guard.status != JobStatus::Completed {
        return Err(not_completed(&**guard, job_id));
    }
    let Some(output) = guard.output_schedule.clone() else {
        return Err(PlanningError::internal(format!(
            "completed job {job_id} has no solution"
        )));
    };
    guard.status = JobStatus::Solving;
    guard.started_at = Some(Utc::now());
    Ok(output)
}

fn not_completed(job: &Job, job_id: Uuid) -> PlanningError {
    PlanningError::invalid_state(format!(
        "operation requires COMPLETED, job {job_id} is {:?}",
        job.status
    ))
}

impl Inner {
    async fn persist_with_retry(&self, job: &Job) -> PlanningResult<()> {
        let mut delay = PERSIST_BACKOFF;
        let mut last_error = None;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.store.save(job) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(job_id = %job.id, attempt, error = %err, "persist attempt failed");
                    last_error = Some(err);
                    if attempt < PERSIST_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| PlanningError::internal("persistence failed with no error")))
    }

    async fn persist_snapshot(&self, job: &Arc<RwLock<Job>>) -> PlanningResult<()> {
        let snapshot = job.read().clone();
        self.persist_with_retry(&snapshot).await
    }

    /// Marks the job FAILED with the error record and persists best-effort.
    async fn fail_job(&self, job: &Arc<RwLock<Job>>, job_id: Uuid, err: &PlanningError) {
        error!(job_id = %job_id, error = %err, "job failed");
        {
            let mut guard = job.write();
            guard.status = JobStatus::Failed;
            guard.completed_at = Some(Utc::now());
            guard.error = Some(err.to_record(Some(job_id)));
        }
        if let Err(persist_err) = self.persist_snapshot(job).await {
            error!(job_id = %job_id, error = %persist_err, "failed to persist FAILED status");
        }
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    worker_id: usize,
) {
    loop {
        let job_id = {
            let mut rx = queue_rx.lock().await;
            match rx.recv().await {
                Some(job_id) => job_id,
                None => break,
            }
        };
        process_job(&inner, job_id, worker_id).await;
    }
}

/// Runs one queued solve: claim SCHEDULED → SOLVING, solve on a blocking
/// thread, publish COMPLETED or FAILED.
async fn process_job(inner: &Arc<Inner>, job_id: Uuid, worker_id: usize) {
    let Some(job) = inner.jobs.read().get(&job_id).cloned() else {
        return;
    };

    // The cancel token is registered while the job lock is still held so
    // a cancel that observes SOLVING always finds a token to trip.
    let token = CancelToken::new();
    let input = {
        let mut guard = job.write();
        if guard.status != JobStatus::Scheduled {
            // Canceled or already handled before we got to it.
            return;
        }
        guard.status = JobStatus::Solving;
        guard.started_at = Some(Utc::now());
        inner.cancels.write().insert(job_id, token.clone());
        guard.input_schedule.clone()
    };
    info!(job_id = %job_id, worker_id, "solve started");

    if let Err(err) = inner.persist_snapshot(&job).await {
        inner.cancels.write().remove(&job_id);
        inner.fail_job(&job, job_id, &err).await;
        return;
    }

    let solver_config = inner.solver.clone();
    let outcome = tokio::task::spawn_blocking(move || solve(input, &solver_config, &token)).await;
    inner.cancels.write().remove(&job_id);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(join_err) => {
            let err = PlanningError::internal(format!("solver task aborted: {join_err}"));
            inner.fail_job(&job, job_id, &err).await;
            return;
        }
    };

    if let Some(mut record) = outcome.error {
        record.job_id = Some(job_id);
        let err = PlanningError::internal(record.message.clone());
        inner.fail_job(&job, job_id, &err).await;
        return;
    }

    {
        let mut guard = job.write();
        guard.status = JobStatus::Completed;
        guard.completed_at = Some(Utc::now());
        guard.output_schedule = Some(outcome.schedule);
        guard.best_score_history.extend(outcome.improvements);
    }
    if let Err(err) = inner.persist_snapshot(&job).await {
        inner.fail_job(&job, job_id, &err).await;
        return;
    }
    info!(job_id = %job_id, score = %outcome.best_score, "solve completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::*;
    use crate::domain::Shift;
    use crate::solver::LogLevel;
    use crate::store::{FileSystemJobStore, MemoryJobStore};
    use std::time::Instant;

    fn nurse(id: &str, name: &str) -> Employee {
        Employee::new(id, name).with_skill("Nurse")
    }

    fn manager_config(budget_ms: u64, workers: usize) -> JobManagerConfig {
        JobManagerConfig {
            workers,
            solver: SolverConfig {
                time_budget: Duration::from_millis(budget_ms),
                log_level: LogLevel::Info,
                seed: Some(0),
                ..Default::default()
            },
        }
    }

    fn feasible_schedule() -> Schedule {
        let day = date(2024, 1, 15);
        Schedule::new(
            vec![nurse("e1", "Amy"), nurse("e2", "Beth")],
            vec![
                shift_on("s1", day, 8, 16)
                    .with_required_skill("Nurse")
                    .with_priority(1),
                Shift::new("s2", dt(day, 16, 0), dt(day, 23, 59))
                    .with_required_skill("Nurse")
                    .with_priority(1),
            ],
        )
    }

    async fn wait_terminal(manager: &JobManager, job_id: Uuid) -> Job {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = manager.get(job_id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            assert!(Instant::now() < deadline, "job never reached a terminal state");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn submit_solve_complete() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();

        let job = wait_terminal(&manager, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        let output = job.output_schedule.unwrap();
        assert_eq!(output.unassigned_shift_count(), 0);
        assert_eq!(output.score.unwrap().hard, 0);
        assert!(!job.best_score_history.is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_invalid_schedule() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![nurse("e1", "Amy"), nurse("e1", "Amy again")],
            vec![shift_on("s1", day, 8, 16)],
        );
        let err = manager.submit(schedule).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 0)).unwrap();
        let err = manager.get(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn delete_requires_terminal_status() {
        // No workers: the job stays SCHEDULED.
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 0)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();

        let err = manager.delete(job_id).unwrap_err();
        assert_eq!(err.code(), "invalid_state.not_completed");

        manager.cancel(job_id).await.unwrap();
        manager.delete(job_id).unwrap();
        assert_eq!(
            manager.get(job_id).unwrap_err().code(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn cancel_before_solving_completes_with_empty_history() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 0)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();

        manager.cancel(job_id).await.unwrap();
        let job = manager.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.best_score_history.is_empty());
        assert!(job.output_schedule.is_none());
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn cancel_during_solving_keeps_best_known() {
        // Part-time targets keep the soft level unsatisfiable, so the
        // solver stays busy for the full budget.
        let day = date(2024, 1, 15);
        let employees: Vec<Employee> = (0..10)
            .map(|i| {
                nurse(&format!("e{i}"), &format!("Employee {i}")).with_skill("Part-time")
            })
            .collect();
        let shifts: Vec<Shift> = (0..40)
            .map(|i| {
                let d = day + chrono::Duration::days(i % 7);
                shift_on(&format!("s{i}"), d, 8, 16).with_required_skill("Nurse")
            })
            .collect();
        let schedule = Schedule::new(employees, shifts);

        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(60_000, 1)).unwrap();
        let job_id = manager.submit(schedule).await.unwrap();

        // Wait until the worker picks it up.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if manager.get(job_id).unwrap().status == JobStatus::Solving {
                break;
            }
            assert!(Instant::now() < deadline, "job never started solving");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        manager.cancel(job_id).await.unwrap();
        let job = wait_terminal(&manager, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        let elapsed = job.completed_at.unwrap() - job.started_at.unwrap();
        assert!(elapsed < chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn add_employee_resolves_skill_gap() {
        // Scenario: one shift nobody can staff until the new hire arrives.
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![nurse("e1", "Amy")],
            vec![
                shift_on("s1", day, 8, 16)
                    .with_required_skill("Nurse")
                    .with_priority(1),
                shift_on("s2", day, 16, 23)
                    .with_required_skill("Anaesthetics")
                    .with_priority(1),
            ],
        );
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(schedule).await.unwrap();
        let job = wait_terminal(&manager, job_id).await;
        let before = job.output_schedule.clone().unwrap();
        assert_eq!(before.shift_by_id("s2").unwrap().assignee, None);

        let hire = Employee::new("e9", "Hugo").with_skill("Anaesthetics");
        let job = manager.add_employee(job_id, hire).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let after = job.output_schedule.unwrap();
        assert_eq!(
            after.shift_by_id("s2").unwrap().assignee.as_deref(),
            Some("e9")
        );
        // The previously clean assignment was pinned and kept.
        assert_eq!(
            after.shift_by_id("s1").unwrap().assignee,
            before.shift_by_id("s1").unwrap().assignee
        );
        assert_eq!(after.score.unwrap().hard, 0);
        // Pins are transient: cleared once the mutation solve finishes.
        assert!(after.shifts.iter().all(|s| !s.pinned));
    }

    #[tokio::test]
    async fn add_employee_rejects_duplicate_id_and_keeps_job_completed() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();
        wait_terminal(&manager, job_id).await;

        let err = manager
            .add_employee(job_id, nurse("e1", "Impostor"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(manager.get(job_id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn mutations_require_completed_status() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 0)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();

        let err = manager
            .add_employee(job_id, nurse("e9", "Hugo"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state.not_completed");
        let err = manager
            .reassign_shift(job_id, "s1", Some("e2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state.not_completed");
    }

    #[tokio::test]
    async fn skill_downgrade_moves_shift_to_qualified_employee() {
        // Scenario: e1 loses the skill a shift needs; e2 can take over.
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![
                Employee::new("e1", "Amy").with_skills(["Nurse", "CPR"]),
                Employee::new("e2", "Beth").with_skill("CPR"),
            ],
            vec![shift_on("s1", day, 8, 16)
                .with_required_skill("CPR")
                .with_priority(1)],
        );
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(schedule).await.unwrap();
        wait_terminal(&manager, job_id).await;

        let new_skills: HashSet<String> = ["Nurse".to_string()].into_iter().collect();
        let job = manager
            .update_skills(job_id, "e1", new_skills)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let after = job.output_schedule.unwrap();
        assert_eq!(
            after.shift_by_id("s1").unwrap().assignee.as_deref(),
            Some("e2")
        );
        assert_eq!(after.score.unwrap().hard, 0);
    }

    #[tokio::test]
    async fn reassign_shift_is_a_point_mutation() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();
        let job = wait_terminal(&manager, job_id).await;
        let history_len = job.best_score_history.len();

        let job = manager
            .reassign_shift(job_id, "s1", Some("e2"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.output_schedule
                .as_ref()
                .unwrap()
                .shift_by_id("s1")
                .unwrap()
                .assignee
                .as_deref(),
            Some("e2")
        );
        // No solver run: history unchanged.
        assert_eq!(job.best_score_history.len(), history_len);
    }

    #[tokio::test]
    async fn illegal_reassign_leaves_job_untouched() {
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![nurse("e1", "Amy"), Employee::new("e2", "Beth").with_skill("Reception")],
            vec![shift_on("s1", day, 8, 16)
                .with_required_skill("Nurse")
                .with_priority(1)],
        );
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(schedule).await.unwrap();
        let before = wait_terminal(&manager, job_id).await;

        let err = manager
            .reassign_shift(job_id, "s1", Some("e2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "illegal_move.required_skill");
        assert_eq!(manager.get(job_id).unwrap(), before);
    }

    #[tokio::test]
    async fn pin_toggle_round_trips() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let job_id = manager.submit(feasible_schedule()).await.unwrap();
        wait_terminal(&manager, job_id).await;

        let ids = vec!["s1".to_string()];
        let job = manager.pin_shifts(job_id, &ids, true).await.unwrap();
        assert!(job
            .output_schedule
            .as_ref()
            .unwrap()
            .shift_by_id("s1")
            .unwrap()
            .pinned);

        let job = manager.pin_shifts(job_id, &ids, false).await.unwrap();
        assert!(!job
            .output_schedule
            .as_ref()
            .unwrap()
            .shift_by_id("s1")
            .unwrap()
            .pinned);
    }

    #[tokio::test]
    async fn rehydration_fails_interrupted_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSystemJobStore::new(dir.path()).unwrap());

        let mut job = Job::new(feasible_schedule());
        job.status = JobStatus::Solving;
        job.started_at = Some(Utc::now());
        store.save(&job).unwrap();

        let manager = JobManager::new(store.clone(), manager_config(300, 0)).unwrap();
        let rehydrated = manager.get(job.id).unwrap();
        assert_eq!(rehydrated.status, JobStatus::Failed);
        let error = rehydrated.error.unwrap();
        assert_eq!(error.code, "interrupted");

        // The flip is persisted: no job is ever observed SOLVING after a
        // restart, even by a fresh manager.
        let reloaded = store.load(job.id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cleanup_removes_old_terminal_jobs() {
        let manager =
            JobManager::new(Arc::new(MemoryJobStore::new()), manager_config(300, 1)).unwrap();
        let old_id = manager.submit(feasible_schedule()).await.unwrap();
        wait_terminal(&manager, old_id).await;
        let fresh_id = manager.submit(feasible_schedule()).await.unwrap();
        wait_terminal(&manager, fresh_id).await;

        // Backdate the first job's completion.
        {
            let job = manager.job_arc(old_id).unwrap();
            job.write().completed_at = Some(Utc::now() - chrono::Duration::hours(48));
        }

        let deleted = manager.cleanup(Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(manager.get(old_id).unwrap_err().code(), "not_found");
        assert!(manager.get(fresh_id).is_ok());
    }

    #[tokio::test]
    async fn job_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSystemJobStore::new(dir.path()).unwrap());
        let manager = JobManager::new(store.clone(), manager_config(300, 1)).unwrap();

        let job_id = manager.submit(feasible_schedule()).await.unwrap();
        let job = wait_terminal(&manager, job_id).await;

        let persisted = store.load(job_id).unwrap().unwrap();
        assert_eq!(persisted, job);
    }
}
