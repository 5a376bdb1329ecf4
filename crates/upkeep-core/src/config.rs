use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Monday 06:00, the start of a new generation period.
pub const DEFAULT_WEEKLY_CRON: &str = "0 0 6 * * Mon";
/// Every day at 07:00, after the weekly run has had its chance.
pub const DEFAULT_CATCH_UP_CRON: &str = "0 0 7 * * *";
pub const DEFAULT_UTC_OFFSET: &str = "+00:00";
pub const DEFAULT_JOB_NUMBER_PREFIX: &str = "DC";
pub const DEFAULT_MAX_NUMBER_ATTEMPTS: u32 = 5;

/// Top-level config (upkeep.toml + UPKEEP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpkeepConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Trigger cadence for the recurring-job scheduler.
///
/// Cron expressions use the seconds-first, six-field form
/// (`sec min hour day-of-month month day-of-week`) and are evaluated in
/// `utc_offset`, so "Monday 06:00" means Monday 06:00 at the depot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_weekly_cron")]
    pub weekly_cron: String,
    #[serde(default = "default_catch_up_cron")]
    pub catch_up_cron: String,
    /// Fixed offset such as `+02:00` or `-05:00`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// Run one catch-up sweep as soon as the service starts (default: true).
    #[serde(default = "bool_true")]
    pub catch_up_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weekly_cron: default_weekly_cron(),
            catch_up_cron: default_catch_up_cron(),
            utc_offset: default_utc_offset(),
            catch_up_on_start: true,
        }
    }
}

/// Settings for generated work orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Leading segment of `PREFIX-YEAR-NNN` job numbers.
    #[serde(default = "default_job_number_prefix")]
    pub number_prefix: String,
    /// How many times a job number is re-allocated after colliding with an
    /// existing one before the template is reported as failed.
    #[serde(default = "default_max_number_attempts")]
    pub max_number_attempts: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            number_prefix: default_job_number_prefix(),
            max_number_attempts: DEFAULT_MAX_NUMBER_ATTEMPTS,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_weekly_cron() -> String {
    DEFAULT_WEEKLY_CRON.to_string()
}
fn default_catch_up_cron() -> String {
    DEFAULT_CATCH_UP_CRON.to_string()
}
fn default_utc_offset() -> String {
    DEFAULT_UTC_OFFSET.to_string()
}
fn default_job_number_prefix() -> String {
    DEFAULT_JOB_NUMBER_PREFIX.to_string()
}
fn default_max_number_attempts() -> u32 {
    DEFAULT_MAX_NUMBER_ATTEMPTS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.upkeep/upkeep.db", home)
}

impl UpkeepConfig {
    /// Load config from a TOML file with UPKEEP_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.upkeep/upkeep.toml
    ///
    /// A missing file is not an error; every field has a default. Nested env
    /// keys are separated by a double underscore because several field names
    /// contain single underscores (`UPKEEP_JOBS__NUMBER_PREFIX=HV`).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: UpkeepConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("UPKEEP_").split("__"))
            .extract()
            .map_err(|e| crate::error::UpkeepError::Config(e.to_string()))?;

        tracing::debug!(%path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.upkeep/upkeep.toml", home)
}
