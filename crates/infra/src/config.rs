//! Configuration loading and representation.
//!
//! Everything comes from environment variables. A `.env` file, if present,
//! is loaded by the binary before [`PipelineConfig::from_env`] runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use vigil_compliance::{CandidateEntry, KeywordFilter};

use crate::feed::{builtin_sample, sample_from_json};
use crate::jobs::{DEFAULT_WARNING_WINDOW_DAYS, ProcessorConfig};
use crate::records::validate_relation;

pub const DEFAULT_FEED_URL: &str = "https://legislatie.just.ro/App/RSS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
    #[error("failed to read {path}: {message}")]
    File { path: PathBuf, message: String },
}

/// Runtime configuration of the pipeline and its HTTP surface.
#[derive(Clone)]
pub struct PipelineConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs everything against the in-memory stores.
    pub database_url: Option<String>,
    pub cron_secret: String,
    pub session_secret: String,
    pub privileged_role: String,
    pub feed_url: String,
    pub feed_keywords_file: Option<PathBuf>,
    pub feed_sample_file: Option<PathBuf>,
    pub item_timeout: Duration,
    pub run_budget: Duration,
    pub stuck_job_timeout: Duration,
    pub feed_timeout: Duration,
    /// Days before expiry at which record checks log a warning.
    pub expiry_warning_days: i64,
    /// Table or view the Postgres record source reads from.
    pub records_relation: Option<String>,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("privileged_role", &self.privileged_role)
            .field("feed_url", &self.feed_url)
            .field("feed_keywords_file", &self.feed_keywords_file)
            .field("feed_sample_file", &self.feed_sample_file)
            .field("item_timeout", &self.item_timeout)
            .field("run_budget", &self.run_budget)
            .field("stuck_job_timeout", &self.stuck_job_timeout)
            .field("feed_timeout", &self.feed_timeout)
            .field("expiry_warning_days", &self.expiry_warning_days)
            .field("records_relation", &self.records_relation)
            .finish_non_exhaustive()
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr: parse_or(&var, "VIGIL_BIND_ADDR", "0.0.0.0:8080".parse().ok())?,
            database_url: var("DATABASE_URL"),
            cron_secret: var("CRON_SECRET").ok_or(ConfigError::Missing("CRON_SECRET"))?,
            session_secret: var("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?,
            privileged_role: var("VIGIL_PRIVILEGED_ROLE").unwrap_or_else(|| "admin".to_string()),
            feed_url: var("VIGIL_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            feed_keywords_file: var("VIGIL_FEED_KEYWORDS_FILE").map(PathBuf::from),
            feed_sample_file: var("VIGIL_FEED_SAMPLE_FILE").map(PathBuf::from),
            item_timeout: seconds(&var, "VIGIL_ITEM_TIMEOUT_SECS", 30)?,
            run_budget: seconds(&var, "VIGIL_RUN_BUDGET_SECS", 280)?,
            stuck_job_timeout: seconds(&var, "VIGIL_STUCK_JOB_TIMEOUT_SECS", 900)?,
            feed_timeout: seconds(&var, "VIGIL_FEED_TIMEOUT_SECS", 20)?,
            expiry_warning_days: i64::from(parse_or::<u32>(
                &var,
                "VIGIL_EXPIRY_WARNING_DAYS",
                u32::try_from(DEFAULT_WARNING_WINDOW_DAYS).ok(),
            )?),
            records_relation: var("VIGIL_RECORDS_RELATION")
                .map(|relation| {
                    validate_relation(&relation).map(|()| relation).map_err(|e| {
                        ConfigError::Invalid {
                            name: "VIGIL_RECORDS_RELATION",
                            message: e.to_string(),
                        }
                    })
                })
                .transpose()?,
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::default()
            .with_item_timeout(self.item_timeout)
            .with_run_budget(self.run_budget)
            .with_reconcile_before_claim(self.stuck_job_timeout)
    }

    /// Keyword list from `VIGIL_FEED_KEYWORDS_FILE`, or the built-in vocabulary.
    pub fn keyword_filter(&self) -> Result<KeywordFilter, ConfigError> {
        match &self.feed_keywords_file {
            Some(path) => {
                let json = read(path)?;
                KeywordFilter::from_json(&json).map_err(|e| ConfigError::File {
                    path: path.clone(),
                    message: e.to_string(),
                })
            }
            None => Ok(KeywordFilter::builtin()),
        }
    }

    /// Fallback sample from `VIGIL_FEED_SAMPLE_FILE`, or the built-in sample.
    pub fn fallback_sample(&self) -> Result<Vec<CandidateEntry>, ConfigError> {
        match &self.feed_sample_file {
            Some(path) => sample_from_json(&read(path)?).map_err(|e| ConfigError::File {
                path: path.clone(),
                message: e.to_string(),
            }),
            None => builtin_sample().map_err(|e| ConfigError::Invalid {
                name: "built-in sample feed",
                message: e.to_string(),
            }),
        }
    }
}

fn read(path: &PathBuf) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::File {
        path: path.clone(),
        message: e.to_string(),
    })
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

fn seconds(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(var, name, Some(default))?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[("CRON_SECRET", "cron"), ("SESSION_SECRET", "session")];

    #[test]
    fn defaults_apply() {
        let config = PipelineConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert!(config.database_url.is_none());
        assert_eq!(config.privileged_role, "admin");
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.item_timeout, Duration::from_secs(30));
        assert_eq!(config.run_budget, Duration::from_secs(280));
        assert_eq!(config.stuck_job_timeout, Duration::from_secs(900));
        assert_eq!(config.feed_timeout, Duration::from_secs(20));
        assert_eq!(config.expiry_warning_days, 30);
        assert!(config.records_relation.is_none());
    }

    #[test]
    fn warning_window_must_be_a_day_count() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_EXPIRY_WARNING_DAYS", "60"));
        assert_eq!(PipelineConfig::from_lookup(lookup(&vars)).unwrap().expiry_warning_days, 60);

        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_EXPIRY_WARNING_DAYS", "-5"));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "VIGIL_EXPIRY_WARNING_DAYS", .. })
        ));
    }

    #[test]
    fn records_relation_is_validated() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_RECORDS_RELATION", "ssm.records_view"));
        let config = PipelineConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.records_relation.as_deref(), Some("ssm.records_view"));

        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_RECORDS_RELATION", "records; DROP TABLE jobs"));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "VIGIL_RECORDS_RELATION", .. })
        ));
    }

    #[test]
    fn secrets_are_required_and_non_empty() {
        let err = PipelineConfig::from_lookup(lookup(&[("SESSION_SECRET", "s")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CRON_SECRET")));

        let err = PipelineConfig::from_lookup(lookup(&[("CRON_SECRET", "  "), ("SESSION_SECRET", "s")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CRON_SECRET")));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_RUN_BUDGET_SECS", "soon"));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "VIGIL_RUN_BUDGET_SECS", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_ITEM_TIMEOUT_SECS", "0"));
        assert!(PipelineConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DATABASE_URL", "postgres://user:pw@db/vigil"));
        let config = PipelineConfig::from_lookup(lookup(&vars)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("pw@db"));
        assert!(!debug.contains("cron"));
    }

    #[test]
    fn builtin_data_loads() {
        let config = PipelineConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert!(!config.keyword_filter().unwrap().keywords().is_empty());
        assert!(!config.fallback_sample().unwrap().is_empty());
    }

    #[test]
    fn missing_data_file_is_reported() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("VIGIL_FEED_KEYWORDS_FILE", "/nonexistent/keywords.json"));
        let config = PipelineConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(matches!(config.keyword_filter(), Err(ConfigError::File { .. })));
    }
}
