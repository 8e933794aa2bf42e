//! Scheduled lifecycle jobs: activation, completion and expiration.
//!
//! Each run goes through [`run_guarded`], which
//! - skips silently when the same job is already running in this process
//!   (debounce against overlapping cron fires, not a distributed lock),
//! - bounds the run with a timeout, and
//! - releases the guard however the run ends.
//!
//! Per-item failures are expected and only reported; a failure to determine
//! the candidate set at all fails the whole run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::batch::BatchRunner;
use crate::campaign::Clock;
use crate::eligibility::EligibilityFinder;
use crate::errors::{LifecycleError, Result};
use crate::executor::{plan, PlannedTransition, StatusTransitionResult, TransitionExecutor};
use crate::repository::CampaignRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Activation,
    Completion,
    Expiration,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [Self::Activation, Self::Completion, Self::Expiration];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Activation => "campaign-activation",
            Self::Completion => "campaign-completion",
            Self::Expiration => "campaign-expiration",
        }
    }

    /// Parse the short form used in URLs (`activation`, ...).
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "activation" => Some(Self::Activation),
            "completion" => Some(Self::Completion),
            "expiration" => Some(Self::Expiration),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Reentrancy guard
// ─────────────────────────────────────────────────────────

/// Process-local `IDLE -> RUNNING -> IDLE` flag for one job.
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

impl RunGuard {
    /// Flip IDLE to RUNNING; `None` when another run holds the guard.
    pub fn try_acquire(&self) -> Option<RunGuardToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuardToken { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Returns the guard to IDLE when dropped.
pub struct RunGuardToken<'a> {
    guard: &'a RunGuard,
}

impl Drop for RunGuardToken<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Run `work` under `guard` with a time limit.
///
/// `Ok(None)` means the job was already running and `work` was never polled.
/// On timeout `work` is dropped, which aborts any item tasks the batch runner
/// still has in flight; writes that already landed stay applied but appear
/// in no result.
pub async fn run_guarded<T, F>(
    kind: JobKind,
    guard: &RunGuard,
    timeout: Duration,
    work: F,
) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    let Some(_token) = guard.try_acquire() else {
        debug!(job = kind.name(), "Previous run still in progress; skipping");
        return Ok(None);
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(outcome) => outcome.map(Some),
        Err(_) => Err(LifecycleError::JobTimeout {
            job: kind.name(),
            secs: timeout.as_secs(),
        }),
    }
}

// ─────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionResult {
    pub job_name: &'static str,
    pub total_processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<StatusTransitionResult>,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl JobExecutionResult {
    pub fn new(
        kind: JobKind,
        results: Vec<StatusTransitionResult>,
        elapsed: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        Self {
            job_name: kind.name(),
            total_processed: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
            execution_time_ms: elapsed.as_millis() as u64,
            timestamp,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &StatusTransitionResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Per-job line of a run-all summary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        job: JobKind,
        total_processed: usize,
        success_count: usize,
        failure_count: usize,
    },
    Skipped {
        job: JobKind,
    },
    Failed {
        job: JobKind,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunAllSummary {
    pub total_jobs: usize,
    pub successful_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,
    pub total_campaigns_processed: usize,
    pub total_successes: usize,
    pub total_failures: usize,
    pub execution_time_ms: u64,
    pub jobs: Vec<JobOutcome>,
}

impl RunAllSummary {
    fn from_outcomes(
        outcomes: Vec<(JobKind, Result<Option<JobExecutionResult>>)>,
        elapsed: Duration,
    ) -> Self {
        let mut summary = RunAllSummary {
            total_jobs: outcomes.len(),
            successful_jobs: 0,
            failed_jobs: 0,
            skipped_jobs: 0,
            total_campaigns_processed: 0,
            total_successes: 0,
            total_failures: 0,
            execution_time_ms: elapsed.as_millis() as u64,
            jobs: Vec::with_capacity(outcomes.len()),
        };

        for (job, outcome) in outcomes {
            match outcome {
                Ok(Some(result)) => {
                    summary.successful_jobs += 1;
                    summary.total_campaigns_processed += result.total_processed;
                    summary.total_successes += result.success_count;
                    summary.total_failures += result.failure_count;
                    summary.jobs.push(JobOutcome::Completed {
                        job,
                        total_processed: result.total_processed,
                        success_count: result.success_count,
                        failure_count: result.failure_count,
                    });
                }
                Ok(None) => {
                    summary.skipped_jobs += 1;
                    summary.jobs.push(JobOutcome::Skipped { job });
                }
                Err(e) => {
                    summary.failed_jobs += 1;
                    summary.jobs.push(JobOutcome::Failed {
                        job,
                        error: e.to_string(),
                    });
                }
            }
        }
        summary
    }
}

// ─────────────────────────────────────────────────────────
// Observability
// ─────────────────────────────────────────────────────────

/// Sink for job outcomes (logs, alerting, error capture).
pub trait JobReporter: Send + Sync {
    fn job_completed(&self, result: &JobExecutionResult);

    /// Called when a run finished with failed items; `sample` is the first
    /// few failures for triage.
    fn item_failures(&self, result: &JobExecutionResult, sample: &[StatusTransitionResult]);

    fn job_failed(&self, kind: JobKind, error: &LifecycleError);

    /// Called when at least one job of a run-all failed outright.
    fn run_all_failed(&self, summary: &RunAllSummary);
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl JobReporter for TracingReporter {
    fn job_completed(&self, result: &JobExecutionResult) {
        info!(
            job = result.job_name,
            total = result.total_processed,
            succeeded = result.success_count,
            failed = result.failure_count,
            elapsed_ms = result.execution_time_ms,
            "Job finished"
        );
    }

    fn item_failures(&self, result: &JobExecutionResult, sample: &[StatusTransitionResult]) {
        let sample = serde_json::to_string(sample).unwrap_or_default();
        warn!(
            job = result.job_name,
            failed = result.failure_count,
            total = result.total_processed,
            %sample,
            "Job finished with failed campaigns"
        );
    }

    fn job_failed(&self, kind: JobKind, error: &LifecycleError) {
        error!(job = kind.name(), "Job failed: {error}");
    }

    fn run_all_failed(&self, summary: &RunAllSummary) {
        error!(
            failed_jobs = summary.failed_jobs,
            total_jobs = summary.total_jobs,
            "Manual run of all lifecycle jobs had failures"
        );
    }
}

// ─────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct JobGuards {
    activation: RunGuard,
    completion: RunGuard,
    expiration: RunGuard,
}

impl JobGuards {
    fn get(&self, kind: JobKind) -> &RunGuard {
        match kind {
            JobKind::Activation => &self.activation,
            JobKind::Completion => &self.completion,
            JobKind::Expiration => &self.expiration,
        }
    }
}

pub struct JobOrchestrator<R> {
    finder: EligibilityFinder<R>,
    executor: Arc<TransitionExecutor<R>>,
    runner: BatchRunner,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn JobReporter>,
    guards: JobGuards,
    timeout: Duration,
    failure_report_limit: usize,
    last_results: RwLock<HashMap<JobKind, JobExecutionResult>>,
}

impl<R: CampaignRepository> JobOrchestrator<R> {
    pub fn new(
        finder: EligibilityFinder<R>,
        executor: Arc<TransitionExecutor<R>>,
        runner: BatchRunner,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn JobReporter>,
    ) -> Self {
        Self {
            finder,
            executor,
            runner,
            clock,
            reporter,
            guards: JobGuards::default(),
            timeout: Duration::from_secs(30 * 60),
            failure_report_limit: 10,
            last_results: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failure_report_limit(mut self, limit: usize) -> Self {
        self.failure_report_limit = limit;
        self
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.guards.get(kind).is_running()
    }

    /// One guarded run of `kind`. `Ok(None)` when debounced.
    pub async fn run_job(&self, kind: JobKind) -> Result<Option<JobExecutionResult>> {
        match kind {
            JobKind::Activation => self.run_activation().await,
            JobKind::Completion => self.run_completion().await,
            JobKind::Expiration => self.run_expiration().await,
        }
    }

    pub async fn run_activation(&self) -> Result<Option<JobExecutionResult>> {
        self.run(JobKind::Activation).await
    }

    pub async fn run_completion(&self) -> Result<Option<JobExecutionResult>> {
        self.run(JobKind::Completion).await
    }

    pub async fn run_expiration(&self) -> Result<Option<JobExecutionResult>> {
        self.run(JobKind::Expiration).await
    }

    async fn run(&self, kind: JobKind) -> Result<Option<JobExecutionResult>> {
        let guard = self.guards.get(kind);
        let outcome = run_guarded(kind, guard, self.timeout, self.sweep(kind)).await;

        match &outcome {
            Ok(Some(result)) => {
                self.reporter.job_completed(result);
                if result.failure_count > 0 {
                    let sample: Vec<_> = result
                        .failures()
                        .take(self.failure_report_limit)
                        .cloned()
                        .collect();
                    self.reporter.item_failures(result, &sample);
                }
                self.last_results.write().await.insert(kind, result.clone());
            }
            Ok(None) => {}
            Err(e) => self.reporter.job_failed(kind, e),
        }
        outcome
    }

    /// Run all three jobs concurrently and settle every outcome.
    pub async fn run_all_jobs(&self) -> RunAllSummary {
        let started = Instant::now();
        info!("Manual trigger: running all lifecycle jobs");

        let (activation, completion, expiration) = tokio::join!(
            self.run_job(JobKind::Activation),
            self.run_job(JobKind::Completion),
            self.run_job(JobKind::Expiration),
        );
        let summary = RunAllSummary::from_outcomes(
            vec![
                (JobKind::Activation, activation),
                (JobKind::Completion, completion),
                (JobKind::Expiration, expiration),
            ],
            started.elapsed(),
        );

        info!(
            successful_jobs = summary.successful_jobs,
            failed_jobs = summary.failed_jobs,
            skipped_jobs = summary.skipped_jobs,
            processed = summary.total_campaigns_processed,
            "Manual trigger finished"
        );
        if summary.failed_jobs > 0 {
            self.reporter.run_all_failed(&summary);
        }
        summary
    }

    /// Most recent result of each job that has completed at least once.
    pub async fn last_results(&self) -> Vec<JobExecutionResult> {
        let last = self.last_results.read().await;
        JobKind::ALL
            .iter()
            .filter_map(|kind| last.get(kind).cloned())
            .collect()
    }

    async fn sweep(&self, kind: JobKind) -> Result<JobExecutionResult> {
        let started = Instant::now();
        let now = self.clock.now();
        let tz = self.finder.timezone(kind);

        let candidates = self.finder.find(kind, now).await?;
        let planned: Vec<PlannedTransition> = candidates
            .into_iter()
            .filter_map(|campaign| {
                plan(kind, &campaign, now, tz).map(|transition| PlannedTransition {
                    campaign,
                    transition,
                })
            })
            .collect();
        info!(job = kind.name(), candidates = planned.len(), "Job started");

        let executor = self.executor.clone();
        let results = self
            .runner
            .run(planned, move |planned| {
                let executor = executor.clone();
                async move { executor.execute(&planned).await }
            })
            .await;

        Ok(JobExecutionResult::new(kind, results, started.elapsed(), now))
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
