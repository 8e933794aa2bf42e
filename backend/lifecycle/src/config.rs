//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use cron::Schedule;

use crate::batch::BatchConfig;
use crate::errors::{LifecycleError, Result};
use crate::jobs::JobKind;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the operational REST API
    pub api_port: u16,
    /// Whether the cron loops are spawned at all
    pub scheduler_enabled: bool,
    /// IANA timezone used for cron evaluation and calendar-date normalization
    pub timezone: Tz,
    /// Per-job overrides of `timezone`
    pub activation_timezone: Option<Tz>,
    pub completion_timezone: Option<Tz>,
    pub expiration_timezone: Option<Tz>,
    /// Cron expressions (sec min hour day-of-month month day-of-week)
    pub activation_cron: String,
    pub completion_cron: String,
    pub expiration_cron: String,
    /// Campaigns transitioned concurrently per chunk
    pub batch_size: usize,
    /// Pause between chunks, in milliseconds
    pub inter_batch_delay_ms: u64,
    /// Start offset between items of one chunk, in milliseconds
    pub item_stagger_ms: u64,
    /// Cap on candidates taken per job run
    pub max_items_per_run: usize,
    /// Repository page size while scanning for candidates
    pub query_page_size: usize,
    /// Upper bound on one job run, in seconds
    pub job_timeout_secs: u64,
    /// How many failing results are attached to a failure report
    pub failure_report_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:./campaigns.db".to_string(),
            api_port: 3002,
            scheduler_enabled: true,
            timezone: Tz::UTC,
            activation_timezone: None,
            completion_timezone: None,
            expiration_timezone: None,
            activation_cron: "0 0 0 * * *".to_string(),
            completion_cron: "0 5 0 * * *".to_string(),
            expiration_cron: "0 10 0 * * *".to_string(),
            batch_size: 10,
            inter_batch_delay_ms: 1_000,
            item_stagger_ms: 100,
            max_items_per_run: 1_000,
            query_page_size: 200,
            job_timeout_secs: 30 * 60,
            failure_report_limit: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let config = Config {
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            api_port: parse_env("API_PORT", defaults.api_port)?,
            scheduler_enabled: parse_env("SCHEDULER_ENABLED", defaults.scheduler_enabled)?,
            timezone: optional_timezone("SCHEDULER_TIMEZONE")?.unwrap_or(defaults.timezone),
            activation_timezone: optional_timezone("ACTIVATION_TIMEZONE")?,
            completion_timezone: optional_timezone("COMPLETION_TIMEZONE")?,
            expiration_timezone: optional_timezone("EXPIRATION_TIMEZONE")?,
            activation_cron: env_var("ACTIVATION_CRON").unwrap_or(defaults.activation_cron),
            completion_cron: env_var("COMPLETION_CRON").unwrap_or(defaults.completion_cron),
            expiration_cron: env_var("EXPIRATION_CRON").unwrap_or(defaults.expiration_cron),
            batch_size: parse_env("BATCH_SIZE", defaults.batch_size)?,
            inter_batch_delay_ms: parse_env("INTER_BATCH_DELAY_MS", defaults.inter_batch_delay_ms)?,
            item_stagger_ms: parse_env("ITEM_STAGGER_MS", defaults.item_stagger_ms)?,
            max_items_per_run: parse_env("MAX_ITEMS_PER_RUN", defaults.max_items_per_run)?,
            query_page_size: parse_env("QUERY_PAGE_SIZE", defaults.query_page_size)?,
            job_timeout_secs: parse_env("JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
            failure_report_limit: parse_env("FAILURE_REPORT_LIMIT", defaults.failure_report_limit)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only blow up once the first job fires.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("BATCH_SIZE", self.batch_size),
            ("MAX_ITEMS_PER_RUN", self.max_items_per_run),
            ("QUERY_PAGE_SIZE", self.query_page_size),
        ] {
            if value == 0 {
                return Err(LifecycleError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.job_timeout_secs == 0 {
            return Err(LifecycleError::Config(
                "JOB_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        for kind in JobKind::ALL {
            self.schedule(kind)?;
        }
        Ok(())
    }

    pub fn cron_expression(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Activation => &self.activation_cron,
            JobKind::Completion => &self.completion_cron,
            JobKind::Expiration => &self.expiration_cron,
        }
    }

    /// Zone `kind` fires and normalizes dates in.
    pub fn timezone_for(&self, kind: JobKind) -> Tz {
        let job_zone = match kind {
            JobKind::Activation => self.activation_timezone,
            JobKind::Completion => self.completion_timezone,
            JobKind::Expiration => self.expiration_timezone,
        };
        job_zone.unwrap_or(self.timezone)
    }

    pub fn schedule(&self, kind: JobKind) -> Result<Schedule> {
        let expr = self.cron_expression(kind);
        Schedule::from_str(expr).map_err(|e| {
            LifecycleError::Config(format!("invalid cron '{expr}' for {}: {e}", kind.name()))
        })
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
            item_stagger: Duration::from_millis(self.item_stagger_ms),
            max_items: self.max_items_per_run,
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LifecycleError::Config(format!("Missing env var: {key}")))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| LifecycleError::Config(format!("Invalid {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn parse_timezone(key: &str, name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| LifecycleError::Config(format!("Invalid {key} '{name}': {e}")))
}

fn optional_timezone(key: &str) -> Result<Option<Tz>> {
    match env_var(key) {
        Ok(name) => parse_timezone(key, &name).map(Some),
        Err(_) => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.batch_config().max_items, 1_000);
        assert_eq!(config.job_timeout(), Duration::from_secs(1_800));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = Config {
            batch_size: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("BATCH_SIZE"), "{err}");
    }

    #[test]
    fn bad_cron_names_the_job() {
        let config = Config {
            completion_cron: "every day at noon".to_string(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("campaign-completion"), "{err}");
    }

    #[test]
    fn job_timezone_falls_back_to_scheduler_timezone() {
        let config = Config {
            timezone: chrono_tz::Asia::Seoul,
            expiration_timezone: Some(chrono_tz::America::New_York),
            ..Config::default()
        };
        assert_eq!(config.timezone_for(JobKind::Activation), chrono_tz::Asia::Seoul);
        assert_eq!(config.timezone_for(JobKind::Completion), chrono_tz::Asia::Seoul);
        assert_eq!(
            config.timezone_for(JobKind::Expiration),
            chrono_tz::America::New_York
        );
    }

    #[test]
    fn from_env_reads_job_timezones() {
        std::env::set_var("SCHEDULER_TIMEZONE", "Europe/Berlin");
        std::env::set_var("COMPLETION_TIMEZONE", "Asia/Tokyo");
        let config = Config::from_env();
        std::env::remove_var("SCHEDULER_TIMEZONE");
        std::env::remove_var("COMPLETION_TIMEZONE");

        let config = config.unwrap();
        assert_eq!(config.timezone_for(JobKind::Activation), chrono_tz::Europe::Berlin);
        assert_eq!(config.timezone_for(JobKind::Completion), chrono_tz::Asia::Tokyo);
        assert_eq!(config.expiration_timezone, None);
    }

    #[test]
    fn timezone_parsing() {
        assert_eq!(
            parse_timezone("SCHEDULER_TIMEZONE", "Asia/Seoul").unwrap(),
            chrono_tz::Asia::Seoul
        );
        let err = parse_timezone("EXPIRATION_TIMEZONE", "Mars/Olympus_Mons").unwrap_err();
        assert!(err.to_string().contains("EXPIRATION_TIMEZONE"), "{err}");
    }
}
