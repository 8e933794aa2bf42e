//! Persistence contract consumed by the lifecycle engine.
//!
//! The engine never issues SQL itself; it reads candidates through
//! [`CampaignRepository::find_many`] and writes through the conditional
//! [`CampaignRepository::update_status`]. A status write only lands when the
//! stored status still equals [`StatusUpdate::expected`], so two schedulers
//! racing on the same campaign cannot both apply a transition.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::campaign::{Campaign, NewCampaign};
use crate::errors::Result;
use crate::status::{CampaignStatus, TransitionReason};

/// Deterministic scan order for candidate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignOrder {
    StartDateAsc,
    EndDateAsc,
}

impl CampaignOrder {
    /// Position of `campaign` in this order.
    pub fn cursor(&self, campaign: &Campaign) -> ScanCursor {
        let deadline = match self {
            CampaignOrder::StartDateAsc => campaign.fundraising_start_date,
            CampaignOrder::EndDateAsc => campaign.fundraising_end_date,
        };
        ScanCursor {
            deadline,
            id: campaign.id,
        }
    }
}

/// Seek position in a deadline-ordered scan: rows strictly after
/// `(deadline, id)` come next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanCursor {
    pub deadline: NaiveDate,
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct CampaignFilter {
    pub statuses: Vec<CampaignStatus>,
    pub order: CampaignOrder,
    pub limit: usize,
    pub after: Option<ScanCursor>,
}

/// One page of a scan.
#[derive(Debug, Clone, Default)]
pub struct CampaignPage {
    pub campaigns: Vec<Campaign>,
    /// Where the next page starts; `None` once the scan is exhausted.
    ///
    /// Follows the last row read, including rows that could not be decoded
    /// and were left out of `campaigns`.
    pub next: Option<ScanCursor>,
}

/// A conditional status write.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub expected: CampaignStatus,
    pub status: CampaignStatus,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// The one-time extension of a fundraising window.
#[derive(Debug, Clone)]
pub struct FundraisingExtension {
    pub expected_end: NaiveDate,
    pub new_end: NaiveDate,
    pub at: DateTime<Utc>,
}

/// One row of a campaign's status audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusHistoryRecord {
    pub campaign_id: i64,
    pub old_status: CampaignStatus,
    pub new_status: CampaignStatus,
    pub reason: TransitionReason,
    pub changed_at: DateTime<Utc>,
}

#[async_trait]
pub trait CampaignRepository: Send + Sync + 'static {
    /// One page of campaigns in `filter.statuses`, in `filter.order`.
    ///
    /// Rows that cannot be decoded are logged and skipped rather than
    /// failing the page.
    async fn find_many(&self, filter: &CampaignFilter) -> Result<CampaignPage>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Campaign>>;

    async fn create(&self, campaign: &NewCampaign, at: DateTime<Utc>) -> Result<Campaign>;

    /// Apply `update` only if the campaign is still in `update.expected`.
    ///
    /// Fails with `Conflict` when the status moved underneath us and with
    /// `NotFound` when the campaign does not exist.
    async fn update_status(&self, id: i64, update: &StatusUpdate) -> Result<Campaign>;

    /// Move the end date once; conditional on `ACTIVE`, no prior extension
    /// and an unchanged end date.
    async fn extend_fundraising(&self, id: i64, extension: &FundraisingExtension)
        -> Result<Campaign>;

    async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryRecord>>;
}
