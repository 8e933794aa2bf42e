//! Candidate selection for the three lifecycle sweeps.
//!
//! The repository filters by status; the date and amount predicates run
//! in-process because they need timezone-normalized calendar math and exact
//! amount-vs-target comparisons. Scans seek through the repository page by
//! page in `(deadline, id)` order so that, when a run is capped, the most
//! overdue campaigns go first and the rest wait for the next run. Seeking
//! rather than counting rows keeps later pages stable while other jobs move
//! campaigns out of the scanned statuses.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::campaign::Campaign;
use crate::errors::Result;
use crate::jobs::JobKind;
use crate::repository::{CampaignFilter, CampaignOrder, CampaignRepository};
use crate::status::CampaignStatus;

pub const DEFAULT_MAX_ITEMS: usize = 1_000;

/// `APPROVED`, the first fundraising day has begun and the last one has not
/// yet ended. A window that closed before activation belongs to expiration.
pub fn is_activation_eligible(campaign: &Campaign, now: DateTime<Utc>, tz: Tz) -> bool {
    campaign.status == CampaignStatus::Approved
        && campaign.fundraising_started(now, tz)
        && !campaign.fundraising_ended(now, tz)
}

/// `ACTIVE` and either the target is met or the last fundraising day is over.
pub fn is_completion_eligible(campaign: &Campaign, now: DateTime<Utc>, tz: Tz) -> bool {
    campaign.status == CampaignStatus::Active
        && (campaign.target_reached() || campaign.fundraising_ended(now, tz))
}

/// Still `PENDING`/`APPROVED` after the last fundraising day is over.
pub fn is_expiration_eligible(campaign: &Campaign, now: DateTime<Utc>, tz: Tz) -> bool {
    matches!(
        campaign.status,
        CampaignStatus::Pending | CampaignStatus::Approved
    ) && campaign.fundraising_ended(now, tz)
}

impl JobKind {
    pub(crate) fn candidate_statuses(&self) -> &'static [CampaignStatus] {
        match self {
            JobKind::Activation => &[CampaignStatus::Approved],
            JobKind::Completion => &[CampaignStatus::Active],
            JobKind::Expiration => &[CampaignStatus::Pending, CampaignStatus::Approved],
        }
    }

    fn scan_order(&self) -> CampaignOrder {
        match self {
            JobKind::Activation => CampaignOrder::StartDateAsc,
            JobKind::Completion | JobKind::Expiration => CampaignOrder::EndDateAsc,
        }
    }

    pub fn is_eligible(&self, campaign: &Campaign, now: DateTime<Utc>, tz: Tz) -> bool {
        if campaign.status.is_terminal() {
            return false;
        }
        match self {
            JobKind::Activation => is_activation_eligible(campaign, now, tz),
            JobKind::Completion => is_completion_eligible(campaign, now, tz),
            JobKind::Expiration => is_expiration_eligible(campaign, now, tz),
        }
    }
}

pub struct EligibilityFinder<R> {
    repo: Arc<R>,
    tz: Tz,
    job_zones: HashMap<JobKind, Tz>,
    max_items: usize,
    page_size: usize,
}

impl<R: CampaignRepository> EligibilityFinder<R> {
    pub fn new(repo: Arc<R>, tz: Tz, max_items: usize, page_size: usize) -> Self {
        Self {
            repo,
            tz,
            job_zones: HashMap::new(),
            max_items: max_items.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Evaluate `kind`'s calendar dates in `tz` instead of the default zone.
    pub fn with_job_timezone(mut self, kind: JobKind, tz: Tz) -> Self {
        self.job_zones.insert(kind, tz);
        self
    }

    pub fn timezone(&self, kind: JobKind) -> Tz {
        self.job_zones.get(&kind).copied().unwrap_or(self.tz)
    }

    /// Up to `max_items` campaigns that `kind` should transition at `now`.
    pub async fn find(&self, kind: JobKind, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        match kind {
            JobKind::Activation => self.find_activation_eligible(now).await,
            JobKind::Completion => self.find_completion_eligible(now).await,
            JobKind::Expiration => self.find_expiration_eligible(now).await,
        }
    }

    pub async fn find_activation_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        self.scan(JobKind::Activation, now).await
    }

    pub async fn find_completion_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        self.scan(JobKind::Completion, now).await
    }

    pub async fn find_expiration_eligible(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        self.scan(JobKind::Expiration, now).await
    }

    /// Seek through the candidate statuses in deadline order.
    ///
    /// Any repository error is returned as-is; the caller treats it as a
    /// failure of the whole run.
    async fn scan(&self, kind: JobKind, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let tz = self.timezone(kind);
        let mut filter = CampaignFilter {
            statuses: kind.candidate_statuses().to_vec(),
            order: kind.scan_order(),
            limit: self.page_size,
            after: None,
        };
        let mut eligible = Vec::new();
        let mut scanned = 0usize;
        let mut capped = false;

        loop {
            let page = self.repo.find_many(&filter).await?;
            scanned += page.campaigns.len();

            for campaign in page.campaigns {
                if !kind.is_eligible(&campaign, now, tz) {
                    continue;
                }
                if eligible.len() == self.max_items {
                    capped = true;
                    break;
                }
                eligible.push(campaign);
            }

            match page.next {
                Some(next) if !capped => filter.after = Some(next),
                _ => break,
            }
        }

        debug!(
            job = kind.name(),
            scanned,
            eligible = eligible.len(),
            "Eligibility scan finished"
        );
        if capped {
            info!(
                job = kind.name(),
                cap = self.max_items,
                "Eligible set capped; remaining campaigns deferred to the next run"
            );
        }
        Ok(eligible)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
