//! Database layer: migrations and the SQLite campaign repository.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{info, warn};

use crate::campaign::{parse_amount, Campaign, NewCampaign};
use crate::errors::{LifecycleError, Result};
use crate::repository::{
    CampaignFilter, CampaignOrder, CampaignPage, CampaignRepository, FundraisingExtension,
    ScanCursor, StatusHistoryRecord, StatusUpdate,
};
use crate::status::CampaignStatus;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = "id, title, status, fundraising_start_date, fundraising_end_date, \
     target_amount, received_amount, extension_count, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: i64,
    title: String,
    status: String,
    fundraising_start_date: NaiveDate,
    fundraising_end_date: NaiveDate,
    target_amount: String,
    received_amount: String,
    extension_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn row_cursor(order: CampaignOrder, row: &CampaignRow) -> ScanCursor {
    let deadline = match order {
        CampaignOrder::StartDateAsc => row.fundraising_start_date,
        CampaignOrder::EndDateAsc => row.fundraising_end_date,
    };
    ScanCursor {
        deadline,
        id: row.id,
    }
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = LifecycleError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        Ok(Campaign {
            id: row.id,
            title: row.title,
            status: row.status.parse()?,
            fundraising_start_date: row.fundraising_start_date,
            fundraising_end_date: row.fundraising_end_date,
            target_amount: parse_amount(&row.target_amount)?,
            received_amount: parse_amount(&row.received_amount)?,
            extension_count: u8::try_from(row.extension_count).map_err(|_| {
                LifecycleError::Validation(format!(
                    "campaign {} has invalid extension_count {}",
                    row.id, row.extension_count
                ))
            })?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    campaign_id: i64,
    old_status: String,
    new_status: String,
    reason: String,
    changed_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for StatusHistoryRecord {
    type Error = LifecycleError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(StatusHistoryRecord {
            campaign_id: row.campaign_id,
            old_status: row.old_status.parse()?,
            new_status: row.new_status.parse()?,
            reason: row.reason.parse()?,
            changed_at: row.changed_at,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Repository
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteCampaignRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: i64) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Campaign::try_from).transpose()
    }

    /// Distinguish "gone" from "changed" after a conditional write touched nothing.
    async fn miss(&self, id: i64, expected: CampaignStatus) -> LifecycleError {
        match self.fetch(id).await {
            Ok(Some(_)) => LifecycleError::Conflict {
                campaign_id: id,
                expected,
            },
            Ok(None) => LifecycleError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    async fn find_many(&self, filter: &CampaignFilter) -> Result<CampaignPage> {
        if filter.statuses.is_empty() || filter.limit == 0 {
            return Ok(CampaignPage::default());
        }
        let deadline = match filter.order {
            CampaignOrder::StartDateAsc => "fundraising_start_date",
            CampaignOrder::EndDateAsc => "fundraising_end_date",
        };

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status IN ("
        ));
        let mut statuses = query.separated(", ");
        for status in &filter.statuses {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");
        if let Some(after) = filter.after {
            query
                .push(format!(" AND ({deadline} > "))
                .push_bind(after.deadline)
                .push(format!(" OR ({deadline} = "))
                .push_bind(after.deadline)
                .push(" AND id > ")
                .push_bind(after.id)
                .push("))");
        }
        query
            .push(format!(" ORDER BY {deadline} ASC, id ASC LIMIT "))
            .push_bind(filter.limit as i64);

        let rows = query
            .build_query_as::<CampaignRow>()
            .fetch_all(&self.pool)
            .await?;

        let next = match rows.last() {
            Some(last) if rows.len() == filter.limit => Some(row_cursor(filter.order, last)),
            _ => None,
        };
        let campaigns = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                Campaign::try_from(row)
                    .map_err(|e| warn!(campaign_id = id, "Skipping unreadable campaign row: {e}"))
                    .ok()
            })
            .collect();

        Ok(CampaignPage { campaigns, next })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Campaign>> {
        self.fetch(id).await
    }

    async fn create(&self, input: &NewCampaign, at: DateTime<Utc>) -> Result<Campaign> {
        let id = sqlx::query(
            r#"
            INSERT INTO campaigns
                (title, status, fundraising_start_date, fundraising_end_date,
                 target_amount, received_amount, extension_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, '0', 0, ?6, ?6)
            "#,
        )
        .bind(&input.title)
        .bind(CampaignStatus::Pending.as_str())
        .bind(input.fundraising_start_date)
        .bind(input.fundraising_end_date)
        .bind(input.target_amount.to_string())
        .bind(at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.fetch(id).await?.ok_or(LifecycleError::NotFound(id))
    }

    async fn update_status(&self, id: i64, update: &StatusUpdate) -> Result<Campaign> {
        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(update.status.as_str())
        .bind(update.at)
        .bind(id)
        .bind(update.expected.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            return Err(self.miss(id, update.expected).await);
        }

        sqlx::query(
            r#"
            INSERT INTO campaign_status_history
                (campaign_id, old_status, new_status, reason, changed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(id)
        .bind(update.expected.as_str())
        .bind(update.status.as_str())
        .bind(update.reason.as_str())
        .bind(update.at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.fetch(id).await?.ok_or(LifecycleError::NotFound(id))
    }

    async fn extend_fundraising(
        &self,
        id: i64,
        extension: &FundraisingExtension,
    ) -> Result<Campaign> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE campaigns
            SET    fundraising_end_date = ?1, extension_count = 1, updated_at = ?2
            WHERE  id = ?3 AND status = ?4 AND extension_count = 0
                   AND fundraising_end_date = ?5
            "#,
        )
        .bind(extension.new_end)
        .bind(extension.at)
        .bind(id)
        .bind(CampaignStatus::Active.as_str())
        .bind(extension.expected_end)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(self.miss(id, CampaignStatus::Active).await);
        }
        self.fetch(id).await?.ok_or(LifecycleError::NotFound(id))
    }

    async fn status_history(&self, id: i64) -> Result<Vec<StatusHistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT campaign_id, old_status, new_status, reason, changed_at
            FROM   campaign_status_history
            WHERE  campaign_id = ?1
            ORDER  BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StatusHistoryRecord::try_from).collect()
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
