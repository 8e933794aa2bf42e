//! # Campaign status
//!
//! [`CampaignStatus`] is a strict forward-only lifecycle. The transition
//! table is the single authority on which moves are legal:
//!
//! ```text
//! Pending ──► Approved ──► Active ──► Processing ──► Completed
//!    │           │           │            │
//!    ▼           ▼           ▼            ▼
//! Rejected   Cancelled   Cancelled    Cancelled
//! ```
//!
//! `Rejected`, `Completed` and `Cancelled` are terminal. Nothing moves a
//! campaign back to an earlier stage; the only side exit is cancellation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{LifecycleError, Result};

/// Lifecycle stage of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// Created, waiting for an administrator.
    Pending,
    /// Approved, fundraising window not yet open.
    Approved,
    /// Accepting donations.
    Active,
    /// Fundraising closed; awaiting disbursement.
    #[serde(alias = "AWAITING_DISBURSEMENT")]
    Processing,
    Completed,
    Rejected,
    Cancelled,
}

impl CampaignStatus {
    #[cfg(test)]
    pub const ALL: [CampaignStatus; 7] = [
        Self::Pending,
        Self::Approved,
        Self::Active,
        Self::Processing,
        Self::Completed,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// Identifier stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Active => "ACTIVE",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Statuses reachable in one step from `self`.
    pub fn allowed_next(&self) -> &'static [CampaignStatus] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::Active, Self::Cancelled],
            Self::Active => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Completed, Self::Cancelled],
            Self::Rejected | Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "ACTIVE" => Ok(Self::Active),
            "PROCESSING" | "AWAITING_DISBURSEMENT" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "REJECTED" => Ok(Self::Rejected),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(LifecycleError::Validation(format!(
                "unknown campaign status '{other}'"
            ))),
        }
    }
}

/// Reject `current -> requested` unless the table allows it.
pub fn ensure_legal(current: CampaignStatus, requested: CampaignStatus) -> Result<()> {
    if current.can_transition_to(requested) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { current, requested })
    }
}

/// Machine-readable cause recorded with every status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionReason {
    FundraisingStartDateReached,
    TargetAmountReached,
    FundraisingEndDateReached,
    PendingExpired,
    ApprovedExpired,
    AdminApproved,
    AdminRejected,
    AdminCancelled,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FundraisingStartDateReached => "FUNDRAISING_START_DATE_REACHED",
            Self::TargetAmountReached => "TARGET_AMOUNT_REACHED",
            Self::FundraisingEndDateReached => "FUNDRAISING_END_DATE_REACHED",
            Self::PendingExpired => "PENDING_EXPIRED",
            Self::ApprovedExpired => "APPROVED_EXPIRED",
            Self::AdminApproved => "ADMIN_APPROVED",
            Self::AdminRejected => "ADMIN_REJECTED",
            Self::AdminCancelled => "ADMIN_CANCELLED",
        }
    }
}

impl FromStr for TransitionReason {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FUNDRAISING_START_DATE_REACHED" => Ok(Self::FundraisingStartDateReached),
            "TARGET_AMOUNT_REACHED" => Ok(Self::TargetAmountReached),
            "FUNDRAISING_END_DATE_REACHED" => Ok(Self::FundraisingEndDateReached),
            "PENDING_EXPIRED" => Ok(Self::PendingExpired),
            "APPROVED_EXPIRED" => Ok(Self::ApprovedExpired),
            "ADMIN_APPROVED" => Ok(Self::AdminApproved),
            "ADMIN_REJECTED" => Ok(Self::AdminRejected),
            "ADMIN_CANCELLED" => Ok(Self::AdminCancelled),
            other => Err(LifecycleError::Validation(format!(
                "unknown transition reason '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
