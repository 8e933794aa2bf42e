//! Campaign data model, calendar normalization and the clock abstraction.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::{LifecycleError, Result};
use crate::status::CampaignStatus;

/// A fundraising campaign as seen by the lifecycle engine.
///
/// Amounts are integer minor units; comparisons never go through floats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub title: String,
    pub status: CampaignStatus,
    pub fundraising_start_date: NaiveDate,
    pub fundraising_end_date: NaiveDate,
    #[serde(with = "amount_string")]
    pub target_amount: i128,
    #[serde(with = "amount_string")]
    pub received_amount: i128,
    /// 0 or 1.
    pub extension_count: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn target_reached(&self) -> bool {
        self.received_amount >= self.target_amount
    }

    /// `true` once the whole last fundraising day has elapsed in `tz`.
    pub fn fundraising_ended(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        end_of_day(self.fundraising_end_date, tz) <= now
    }

    /// `true` once the first fundraising day has begun in `tz`.
    pub fn fundraising_started(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        self.fundraising_start_date <= local_date(now, tz)
    }
}

/// Fields supplied when a campaign is created. Status always starts at `PENDING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub title: String,
    pub fundraising_start_date: NaiveDate,
    pub fundraising_end_date: NaiveDate,
    #[serde(with = "amount_string")]
    pub target_amount: i128,
}

impl NewCampaign {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(LifecycleError::Validation("title must not be empty".into()));
        }
        if self.target_amount <= 0 {
            return Err(LifecycleError::InvalidAmount(format!(
                "target amount must be positive, got {}",
                self.target_amount
            )));
        }
        if self.fundraising_start_date > self.fundraising_end_date {
            return Err(LifecycleError::Validation(format!(
                "fundraising start {} is after end {}",
                self.fundraising_start_date, self.fundraising_end_date
            )));
        }
        Ok(())
    }
}

/// Parse a decimal amount string (as stored in the database) into minor units.
pub fn parse_amount(raw: &str) -> Result<i128> {
    let trimmed = raw.trim();
    let value: i128 = trimmed
        .parse()
        .map_err(|_| LifecycleError::InvalidAmount(format!("'{raw}' is not an integer amount")))?;
    if value < 0 {
        return Err(LifecycleError::InvalidAmount(format!("'{raw}' is negative")));
    }
    Ok(value)
}

/// Amounts travel as JSON strings so that values beyond 2^53 survive clients.
pub mod amount_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_amount(&raw).map_err(de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────
// Calendar helpers
// ─────────────────────────────────────────────────────────

/// The calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// The last millisecond of `date` in `tz`, as a UTC instant.
pub fn end_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let last_ms = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    match tz.from_local_datetime(&date.and_time(last_ms)).latest() {
        Some(local) => local.with_timezone(&Utc),
        // 23:59:59.999 fell into a DST gap; back off from the next midnight instead.
        None => start_of_day(date + Duration::days(1), tz) - Duration::milliseconds(1),
    }
}

/// Local midnight of `date` in `tz`, as a UTC instant.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let mut naive = date.and_time(NaiveTime::MIN);
    // Midnight can be skipped by a DST jump; walk forward to the first valid minute.
    for _ in 0..180 {
        if let Some(local) = tz.from_local_datetime(&naive).earliest() {
            return local.with_timezone(&Utc);
        }
        naive += Duration::minutes(1);
    }
    naive.and_utc()
}

// ─────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────

/// Source of "now" for eligibility and audit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Clock pinned to an instant that tests can move.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    /// A campaign with sensible defaults; tests override what they care about.
    pub fn campaign(id: i64, status: CampaignStatus, start: NaiveDate, end: NaiveDate) -> Campaign {
        let created = at(2024, 1, 1, 0, 0);
        Campaign {
            id,
            title: format!("campaign-{id}"),
            status,
            fundraising_start_date: start,
            fundraising_end_date: end,
            target_amount: 1_000,
            received_amount: 0,
            extension_count: 0,
            created_at: created,
            updated_at: created,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
