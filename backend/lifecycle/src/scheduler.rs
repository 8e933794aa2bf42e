//! Long-running background tasks that fire the lifecycle jobs on their cron
//! schedules.
//!
//! Every fire spawns the run instead of awaiting it, so a run that outlasts
//! its interval meets the job's reentrancy guard on the next fire rather
//! than delaying the schedule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jobs::{JobKind, JobOrchestrator};
use crate::repository::CampaignRepository;

/// Next fire strictly after `after`, evaluated in `tz`.
pub fn next_fire(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|fire| fire.with_timezone(&Utc))
}

/// Spawn one loop per `(job, schedule, zone)` triple.
pub fn spawn_all<R: CampaignRepository>(
    orchestrator: Arc<JobOrchestrator<R>>,
    schedules: Vec<(JobKind, Schedule, Tz)>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    schedules
        .into_iter()
        .map(|(kind, schedule, tz)| {
            tokio::spawn(run(
                orchestrator.clone(),
                kind,
                schedule,
                tz,
                shutdown.clone(),
            ))
        })
        .collect()
}

/// Sleep until each fire time and launch the job, until `shutdown` is cancelled.
pub async fn run<R: CampaignRepository>(
    orchestrator: Arc<JobOrchestrator<R>>,
    kind: JobKind,
    schedule: Schedule,
    tz: Tz,
    shutdown: CancellationToken,
) {
    info!(job = kind.name(), timezone = %tz, "Scheduler loop starting");

    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        // The wall clock may trail the timer slightly; never fire the same slot twice.
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(fire_at) = next_fire(&schedule, tz, from) else {
            warn!(job = kind.name(), "Cron schedule has no upcoming fire time; stopping");
            return;
        };
        let wait = (fire_at - now).to_std().unwrap_or_default();
        info!(job = kind.name(), next_run = %fire_at, "Next run scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(job = kind.name(), "Scheduler loop stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }
        last_fire = Some(fire_at);

        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_job(kind).await {
                debug!(job = kind.name(), "Scheduled run ended with error: {e}");
            }
        });
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
