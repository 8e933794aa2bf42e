//! Application-wide error types.

use thiserror::Error;

use crate::status::CampaignStatus;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller asked for a status change the transition table does not allow.
    #[error("Illegal status transition: {current} -> {requested}")]
    InvalidTransition {
        current: CampaignStatus,
        requested: CampaignStatus,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    /// The conditional write found the campaign in a different state than expected.
    #[error("Campaign {campaign_id} changed concurrently (expected status {expected})")]
    Conflict {
        campaign_id: i64,
        expected: CampaignStatus,
    },

    #[error("Campaign {0} not found")]
    NotFound(i64),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Job {job} exceeded its {secs}s time limit")]
    JobTimeout { job: &'static str, secs: u64 },
}

impl LifecycleError {
    /// `true` for errors caused by the request rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::Validation(_) | Self::InvalidAmount(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
