//! End-to-end lifecycle scenarios: orchestrator, finder, executor and batch
//! runner wired together over the in-memory repository and a fixed clock.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;

use crate::batch::{BatchConfig, BatchRunner};
use crate::campaign::testing::{at, campaign, date, FixedClock};
use crate::campaign::Campaign;
use crate::eligibility::EligibilityFinder;
use crate::executor::{PlannedTransition, Transition, TransitionExecutor};
use crate::jobs::tests::RecordingReporter;
use crate::jobs::{JobKind, JobOrchestrator};
use crate::repository::memory::InMemoryCampaignRepository;
use crate::repository::CampaignRepository;
use crate::status::{CampaignStatus::*, TransitionReason};

struct Harness {
    repo: Arc<InMemoryCampaignRepository>,
    clock: Arc<FixedClock>,
    reporter: Arc<RecordingReporter>,
    executor: Arc<TransitionExecutor<InMemoryCampaignRepository>>,
    orchestrator: JobOrchestrator<InMemoryCampaignRepository>,
}

fn harness(campaigns: Vec<Campaign>) -> Harness {
    harness_with(campaigns, Tz::UTC, 100, 10)
}

fn harness_with(
    campaigns: Vec<Campaign>,
    tz: Tz,
    max_items: usize,
    report_limit: usize,
) -> Harness {
    let repo = Arc::new(InMemoryCampaignRepository::with_campaigns(campaigns));
    let clock = Arc::new(FixedClock::new(at(2024, 6, 1, 0, 30)));
    let reporter = Arc::new(RecordingReporter::default());
    let executor = Arc::new(TransitionExecutor::new(repo.clone(), clock.clone()));
    let orchestrator = JobOrchestrator::new(
        EligibilityFinder::new(repo.clone(), tz, max_items, 2),
        executor.clone(),
        BatchRunner::new(BatchConfig {
            batch_size: 3,
            inter_batch_delay: Duration::ZERO,
            item_stagger: Duration::ZERO,
            max_items,
        }),
        clock.clone(),
        reporter.clone(),
    )
    .with_failure_report_limit(report_limit);

    Harness {
        repo,
        clock,
        reporter,
        executor,
        orchestrator,
    }
}

fn funded(mut c: Campaign) -> Campaign {
    c.received_amount = c.target_amount;
    c
}

#[tokio::test]
async fn activation_is_idempotent_across_runs() {
    let h = harness(vec![
        campaign(1, Approved, date(2024, 5, 20), date(2024, 6, 30)),
        campaign(2, Approved, date(2024, 6, 1), date(2024, 6, 30)),
        campaign(3, Approved, date(2024, 6, 2), date(2024, 6, 30)),
    ]);

    let first = h.orchestrator.run_activation().await.unwrap().unwrap();
    assert_eq!(first.total_processed, 2);
    assert_eq!(first.success_count, 2);
    assert!(first.results.iter().all(|r| {
        r.reason == TransitionReason::FundraisingStartDateReached && r.new_status == Active
    }));
    assert_eq!(h.repo.get(3).unwrap().status, Approved);

    let second = h.orchestrator.run_activation().await.unwrap().unwrap();
    assert_eq!(second.total_processed, 0);
    assert!(second.results.is_empty());
}

#[tokio::test]
async fn approved_campaign_past_its_window_is_cancelled_not_activated() {
    let h = harness(vec![campaign(1, Approved, date(2024, 5, 1), date(2024, 5, 31))]);

    // Cron order: activation fires first, then completion, then expiration.
    let activation = h.orchestrator.run_activation().await.unwrap().unwrap();
    assert_eq!(activation.total_processed, 0);
    let completion = h.orchestrator.run_completion().await.unwrap().unwrap();
    assert_eq!(completion.total_processed, 0);
    let expiration = h.orchestrator.run_expiration().await.unwrap().unwrap();
    assert_eq!(expiration.success_count, 1);

    assert_eq!(h.repo.get(1).unwrap().status, Cancelled);
    let history = h.repo.status_history(1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, TransitionReason::ApprovedExpired);
}

#[tokio::test]
async fn run_all_sends_closed_approved_windows_to_expiration() {
    let h = harness(vec![
        campaign(1, Approved, date(2024, 5, 1), date(2024, 5, 31)),
        campaign(2, Approved, date(2024, 5, 20), date(2024, 6, 30)),
    ]);

    let summary = h.orchestrator.run_all_jobs().await;
    assert_eq!(summary.failed_jobs, 0);
    assert_eq!(summary.total_campaigns_processed, 2);
    assert_eq!(summary.total_successes, 2);
    assert_eq!(h.repo.get(1).unwrap().status, Cancelled);
    assert_eq!(h.repo.get(2).unwrap().status, Active);
}

#[tokio::test]
async fn completion_distinguishes_target_from_deadline() {
    let h = harness(vec![
        funded(campaign(1, Active, date(2024, 5, 1), date(2024, 6, 30))),
        campaign(2, Active, date(2024, 5, 1), date(2024, 5, 31)),
        campaign(3, Active, date(2024, 5, 1), date(2024, 6, 1)),
    ]);

    let result = h.orchestrator.run_completion().await.unwrap().unwrap();
    assert_eq!(result.total_processed, 2);

    let by_id = |id: i64| result.results.iter().find(|r| r.campaign_id == id).unwrap();
    assert_eq!(by_id(1).new_status, Processing);
    assert_eq!(by_id(1).reason, TransitionReason::TargetAmountReached);
    assert_eq!(by_id(2).new_status, Processing);
    assert_eq!(by_id(2).reason, TransitionReason::FundraisingEndDateReached);
    assert_eq!(h.repo.get(3).unwrap().status, Active);
}

#[tokio::test]
async fn expiration_rejects_pending_and_cancels_approved() {
    let h = harness(vec![
        campaign(1, Pending, date(2024, 5, 1), date(2024, 5, 31)),
        campaign(2, Approved, date(2024, 5, 1), date(2024, 5, 31)),
        campaign(3, Pending, date(2024, 5, 1), date(2024, 6, 1)),
    ]);

    let result = h.orchestrator.run_expiration().await.unwrap().unwrap();
    assert_eq!(result.total_processed, 2);
    assert_eq!(h.repo.get(1).unwrap().status, Rejected);
    assert_eq!(h.repo.get(2).unwrap().status, Cancelled);
    assert_eq!(h.repo.get(3).unwrap().status, Pending);

    let history = h.repo.status_history(1).await.unwrap();
    assert_eq!(history[0].reason, TransitionReason::PendingExpired);
    let history = h.repo.status_history(2).await.unwrap();
    assert_eq!(history[0].reason, TransitionReason::ApprovedExpired);
}

#[tokio::test]
async fn start_day_follows_the_configured_timezone() {
    let seoul: Tz = "Asia/Seoul".parse().unwrap();
    let campaigns = vec![campaign(1, Approved, date(2024, 6, 2), date(2024, 6, 30))];

    // 15:30 UTC on June 1st is already June 2nd in Seoul.
    let h = harness_with(campaigns.clone(), seoul, 100, 10);
    h.clock.set(at(2024, 6, 1, 15, 30));
    let result = h.orchestrator.run_activation().await.unwrap().unwrap();
    assert_eq!(result.total_processed, 1);

    let h = harness_with(campaigns, Tz::UTC, 100, 10);
    h.clock.set(at(2024, 6, 1, 15, 30));
    let result = h.orchestrator.run_activation().await.unwrap().unwrap();
    assert_eq!(result.total_processed, 0);
}

#[tokio::test]
async fn capped_runs_take_the_most_overdue_first() {
    let campaigns = (1..=7)
        .map(|id| campaign(id, Active, date(2024, 4, 1), date(2024, 5, 31 - id as u32)))
        .collect();
    let h = harness_with(campaigns, Tz::UTC, 3, 10);

    let first = h.orchestrator.run_completion().await.unwrap().unwrap();
    let ids: Vec<i64> = first.results.iter().map(|r| r.campaign_id).collect();
    assert_eq!(ids, vec![7, 6, 5]);

    let second = h.orchestrator.run_completion().await.unwrap().unwrap();
    assert_eq!(second.total_processed, 3);
    let third = h.orchestrator.run_completion().await.unwrap().unwrap();
    assert_eq!(third.total_processed, 1);
    let fourth = h.orchestrator.run_completion().await.unwrap().unwrap();
    assert_eq!(fourth.total_processed, 0);
}

#[tokio::test]
async fn item_failures_are_isolated_sampled_and_retried_next_run() {
    let campaigns = (1..=5)
        .map(|id| campaign(id, Active, date(2024, 5, 1), date(2024, 5, 31)))
        .collect();
    let h = harness_with(campaigns, Tz::UTC, 100, 2);
    for id in [2, 3, 5] {
        h.repo.fail_updates_for(id);
    }

    let result = h.orchestrator.run_completion().await.unwrap().unwrap();
    assert_eq!(result.total_processed, 5);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 3);
    assert_eq!(result.success_count + result.failure_count, result.total_processed);
    assert!(result.failures().all(|f| f.error.is_some()));

    assert_eq!(
        *h.reporter.item_failures.lock().unwrap(),
        vec![("campaign-completion".to_string(), 2)]
    );
    assert_eq!(h.repo.get(1).unwrap().status, Processing);
    assert_eq!(h.repo.get(2).unwrap().status, Active);

    let retry = h.orchestrator.run_completion().await.unwrap().unwrap();
    let ids: Vec<i64> = retry.results.iter().map(|r| r.campaign_id).collect();
    assert_eq!(ids, vec![2, 3, 5]);
}

#[tokio::test]
async fn query_failure_fails_the_job_and_clears_the_guard() {
    let h = harness(vec![campaign(1, Approved, date(2024, 5, 1), date(2024, 6, 30))]);
    h.repo.fail_queries(true);

    assert!(h.orchestrator.run_activation().await.is_err());
    assert!(!h.orchestrator.is_running(JobKind::Activation));
    assert_eq!(h.reporter.job_failures.lock().unwrap().len(), 1);
    assert!(h.orchestrator.last_results().await.is_empty());

    h.repo.fail_queries(false);
    let result = h.orchestrator.run_activation().await.unwrap().unwrap();
    assert_eq!(result.success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_trigger_is_debounced() {
    let h = harness(vec![campaign(1, Approved, date(2024, 5, 1), date(2024, 6, 30))]);
    h.repo.delay_queries(Duration::from_secs(5));

    let (a, b) = tokio::join!(
        h.orchestrator.run_activation(),
        h.orchestrator.run_activation(),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.is_some() != b.is_some());
    assert_eq!(h.repo.query_count(), 1);
    assert_eq!(h.repo.update_count(), 1);
    assert!(!h.orchestrator.is_running(JobKind::Activation));
}

#[tokio::test]
async fn stale_read_loses_to_concurrent_writer() {
    let h = harness(vec![campaign(1, Active, date(2024, 5, 1), date(2024, 5, 31))]);
    let stale = h.repo.get(1).unwrap();

    // Another instance cancels the campaign after we read it.
    h.repo.force_status(1, Cancelled);

    let result = h
        .executor
        .execute(&PlannedTransition {
            campaign: stale,
            transition: Transition::to(Processing, TransitionReason::FundraisingEndDateReached),
        })
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("changed concurrently"));
    assert_eq!(h.repo.get(1).unwrap().status, Cancelled);
    assert!(h.repo.status_history(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_all_settles_every_job() {
    let h = harness(vec![
        campaign(1, Approved, date(2024, 5, 20), date(2024, 6, 30)),
        funded(campaign(2, Active, date(2024, 5, 1), date(2024, 6, 30))),
        campaign(3, Pending, date(2024, 5, 1), date(2024, 5, 15)),
    ]);

    let summary = h.orchestrator.run_all_jobs().await;
    assert_eq!(summary.total_jobs, 3);
    assert_eq!(summary.successful_jobs, 3);
    assert_eq!(summary.failed_jobs, 0);
    assert_eq!(summary.total_campaigns_processed, 3);
    assert_eq!(summary.total_successes, 3);
    assert_eq!(h.orchestrator.last_results().await.len(), 3);
    assert_eq!(*h.reporter.run_all_failures.lock().unwrap(), 0);

    h.repo.fail_queries(true);
    let summary = h.orchestrator.run_all_jobs().await;
    assert_eq!(summary.failed_jobs, 3);
    assert_eq!(summary.total_campaigns_processed, 0);
    assert_eq!(*h.reporter.run_all_failures.lock().unwrap(), 1);
    // Failed runs leave the previous results in place.
    assert_eq!(h.orchestrator.last_results().await.len(), 3);
}

#[tokio::test]
async fn terminal_campaigns_are_never_touched() {
    let h = harness(vec![
        campaign(1, Completed, date(2024, 5, 1), date(2024, 5, 31)),
        campaign(2, Rejected, date(2024, 5, 1), date(2024, 5, 31)),
        campaign(3, Cancelled, date(2024, 5, 1), date(2024, 5, 31)),
        funded(campaign(4, Processing, date(2024, 5, 1), date(2024, 5, 31))),
    ]);

    let summary = h.orchestrator.run_all_jobs().await;
    assert_eq!(summary.total_campaigns_processed, 0);
    assert_eq!(h.repo.update_count(), 0);
}
