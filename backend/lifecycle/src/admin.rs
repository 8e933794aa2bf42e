//! Explicit administrator actions on a campaign.
//!
//! Unlike scheduler sweeps, these surface validation errors to the caller.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use tracing::info;

use crate::campaign::{local_date, Campaign, Clock, NewCampaign};
use crate::errors::{LifecycleError, Result};
use crate::executor::{Transition, TransitionExecutor};
use crate::repository::{CampaignRepository, FundraisingExtension};
use crate::status::{CampaignStatus, TransitionReason};

/// How close to the end date an extension may be requested.
pub const EXTENSION_WINDOW_DAYS: i64 = 7;
pub const MAX_EXTENSIONS: u8 = 1;

pub struct CampaignAdmin<R> {
    repo: Arc<R>,
    executor: Arc<TransitionExecutor<R>>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl<R: CampaignRepository> CampaignAdmin<R> {
    pub fn new(
        repo: Arc<R>,
        executor: Arc<TransitionExecutor<R>>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            repo,
            executor,
            clock,
            tz,
        }
    }

    pub async fn create(&self, input: NewCampaign) -> Result<Campaign> {
        input.validate()?;
        let campaign = self.repo.create(&input, self.clock.now()).await?;
        info!(campaign_id = campaign.id, "Campaign created");
        Ok(campaign)
    }

    /// Approve a pending campaign.
    ///
    /// When the fundraising window has already opened the campaign goes
    /// straight to `ACTIVE` in one write.
    pub async fn approve(&self, id: i64) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        let now = self.clock.now();
        if campaign.fundraising_ended(now, self.tz) {
            return Err(LifecycleError::Validation(format!(
                "campaign {id} fundraising window closed on {}",
                campaign.fundraising_end_date
            )));
        }
        let transition = if campaign.fundraising_started(now, self.tz) {
            Transition::escalated(
                CampaignStatus::Approved,
                CampaignStatus::Active,
                TransitionReason::FundraisingStartDateReached,
            )
        } else {
            Transition::to(CampaignStatus::Approved, TransitionReason::AdminApproved)
        };
        self.apply(&campaign, transition).await
    }

    pub async fn reject(&self, id: i64) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        self.apply(
            &campaign,
            Transition::to(CampaignStatus::Rejected, TransitionReason::AdminRejected),
        )
        .await
    }

    pub async fn cancel(&self, id: i64) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        self.apply(
            &campaign,
            Transition::to(CampaignStatus::Cancelled, TransitionReason::AdminCancelled),
        )
        .await
    }

    /// Push the end date out once, in the last week of fundraising.
    pub async fn extend_fundraising(&self, id: i64, new_end: NaiveDate) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        let now = self.clock.now();
        check_extension(&campaign, local_date(now, self.tz), new_end)?;

        let extension = FundraisingExtension {
            expected_end: campaign.fundraising_end_date,
            new_end,
            at: now,
        };
        let updated = self.repo.extend_fundraising(id, &extension).await?;
        info!(
            campaign_id = id,
            old_end = %campaign.fundraising_end_date,
            new_end = %new_end,
            "Fundraising extended"
        );
        Ok(updated)
    }

    async fn load(&self, id: i64) -> Result<Campaign> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))
    }

    async fn apply(&self, campaign: &Campaign, transition: Transition) -> Result<Campaign> {
        let updated = self.executor.apply(campaign, transition).await?;
        info!(
            campaign_id = campaign.id,
            from = %campaign.status,
            to = %updated.status,
            reason = %transition.reason,
            "Admin action applied"
        );
        Ok(updated)
    }
}

/// Extension rules: `ACTIVE`, never extended, requested within the last
/// [`EXTENSION_WINDOW_DAYS`] days up to the end date, and actually later.
pub fn check_extension(campaign: &Campaign, today: NaiveDate, new_end: NaiveDate) -> Result<()> {
    if campaign.status != CampaignStatus::Active {
        return Err(LifecycleError::Validation(format!(
            "only ACTIVE campaigns can be extended (campaign {} is {})",
            campaign.id, campaign.status
        )));
    }
    if campaign.extension_count >= MAX_EXTENSIONS {
        return Err(LifecycleError::Validation(format!(
            "campaign {} has already been extended",
            campaign.id
        )));
    }
    let end = campaign.fundraising_end_date;
    if today > end || today < end - Duration::days(EXTENSION_WINDOW_DAYS) {
        return Err(LifecycleError::Validation(format!(
            "extensions are only allowed within {EXTENSION_WINDOW_DAYS} days of the end date {end}"
        )));
    }
    if new_end <= end {
        return Err(LifecycleError::Validation(format!(
            "new end date {new_end} must be after the current end date {end}"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
