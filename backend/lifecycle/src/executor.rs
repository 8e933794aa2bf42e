//! Applies one status transition to one campaign.
//!
//! [`TransitionExecutor::apply`] surfaces every error to the caller and is
//! what admin actions use. [`TransitionExecutor::execute`] wraps it for the
//! scheduler: failures come back inside a [`StatusTransitionResult`] and are
//! never propagated, so a batch never sees an error from a single item.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, warn};

use crate::campaign::{Campaign, Clock};
use crate::errors::Result;
use crate::jobs::JobKind;
use crate::repository::{CampaignRepository, StatusUpdate};
use crate::status::{ensure_legal, CampaignStatus, TransitionReason};

/// Outcome of one attempted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTransitionResult {
    pub campaign_id: i64,
    pub old_status: CampaignStatus,
    pub new_status: CampaignStatus,
    pub reason: TransitionReason,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusTransitionResult {
    pub fn succeeded(planned: &PlannedTransition) -> Self {
        Self {
            campaign_id: planned.campaign.id,
            old_status: planned.campaign.status,
            new_status: planned.transition.target,
            reason: planned.transition.reason,
            success: true,
            error: None,
        }
    }

    pub fn failed(planned: &PlannedTransition, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(planned)
        }
    }
}

/// Target status plus the reason recorded for it.
///
/// `via` names an intermediate status that is skipped over in a single write
/// (auto-escalation); both hops must be legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub target: CampaignStatus,
    pub reason: TransitionReason,
    pub via: Option<CampaignStatus>,
}

impl Transition {
    pub fn to(target: CampaignStatus, reason: TransitionReason) -> Self {
        Self {
            target,
            reason,
            via: None,
        }
    }

    pub fn escalated(
        via: CampaignStatus,
        target: CampaignStatus,
        reason: TransitionReason,
    ) -> Self {
        Self {
            target,
            reason,
            via: Some(via),
        }
    }

    /// Check every hop against the transition table.
    pub fn validate(&self, current: CampaignStatus) -> Result<()> {
        match self.via {
            Some(via) => {
                ensure_legal(current, via)?;
                ensure_legal(via, self.target)
            }
            None => ensure_legal(current, self.target),
        }
    }
}

/// A campaign paired with the transition a sweep wants to apply to it.
#[derive(Debug, Clone)]
pub struct PlannedTransition {
    pub campaign: Campaign,
    pub transition: Transition,
}

/// Decide what `kind` does to an eligible campaign.
///
/// Returns `None` when the campaign is not a candidate for `kind` at `now`.
pub fn plan(kind: JobKind, campaign: &Campaign, now: DateTime<Utc>, tz: Tz) -> Option<Transition> {
    if !kind.is_eligible(campaign, now, tz) {
        return None;
    }
    let transition = match (kind, campaign.status) {
        (JobKind::Activation, _) => Transition::to(
            CampaignStatus::Active,
            TransitionReason::FundraisingStartDateReached,
        ),
        (JobKind::Completion, _) if campaign.target_reached() => Transition::to(
            CampaignStatus::Processing,
            TransitionReason::TargetAmountReached,
        ),
        (JobKind::Completion, _) => Transition::to(
            CampaignStatus::Processing,
            TransitionReason::FundraisingEndDateReached,
        ),
        (JobKind::Expiration, CampaignStatus::Pending) => {
            Transition::to(CampaignStatus::Rejected, TransitionReason::PendingExpired)
        }
        (JobKind::Expiration, _) => {
            Transition::to(CampaignStatus::Cancelled, TransitionReason::ApprovedExpired)
        }
    };
    Some(transition)
}

pub struct TransitionExecutor<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R: CampaignRepository> TransitionExecutor<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Validate, then persist with a write conditional on the status we read.
    pub async fn apply(&self, campaign: &Campaign, transition: Transition) -> Result<Campaign> {
        transition.validate(campaign.status)?;

        let update = StatusUpdate {
            expected: campaign.status,
            status: transition.target,
            reason: transition.reason,
            at: self.clock.now(),
        };
        let updated = self.repo.update_status(campaign.id, &update).await?;

        debug!(
            campaign_id = campaign.id,
            from = %campaign.status,
            to = %transition.target,
            reason = %transition.reason,
            "Campaign status updated"
        );
        Ok(updated)
    }

    /// Like [`apply`](Self::apply) but never fails: errors become a failed result.
    pub async fn execute(&self, planned: &PlannedTransition) -> StatusTransitionResult {
        match self.apply(&planned.campaign, planned.transition).await {
            Ok(_) => StatusTransitionResult::succeeded(planned),
            Err(e) => {
                warn!(
                    campaign_id = planned.campaign.id,
                    from = %planned.campaign.status,
                    to = %planned.transition.target,
                    "Status transition failed: {e}"
                );
                StatusTransitionResult::failed(planned, e.to_string())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
