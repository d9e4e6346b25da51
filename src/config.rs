//! Environment-level configuration.
//!
//! All knobs come from environment variables with documented defaults.
//! Malformed values are rejected at startup (exit code 2 in the CLI)
//! rather than silently falling back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::constraints::EvaluatorConfig;
use crate::error::{PlanningError, PlanningResult};
use crate::solver::{LogLevel, SolverConfig};
use crate::store::{FileSystemJobStore, JobStore, MemoryJobStore};

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_STORAGE_DIR: &str = "./job_storage";

/// Which persistence backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    Filesystem(PathBuf),
}

impl StorageConfig {
    pub fn build(&self) -> PlanningResult<Arc<dyn JobStore>> {
        match self {
            StorageConfig::Memory => Ok(Arc::new(MemoryJobStore::new())),
            StorageConfig::Filesystem(dir) => Ok(Arc::new(FileSystemJobStore::new(dir.clone())?)),
        }
    }
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub solver_timeout: Duration,
    pub log_level: LogLevel,
    pub storage: StorageConfig,
    pub evaluator: EvaluatorConfig,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    ///
    /// Variables: `SOLVER_TIMEOUT_SECONDS` (default 120),
    /// `SOLVER_LOG_LEVEL` (`INFO`|`DEBUG`), `JOB_STORAGE_TYPE`
    /// (`memory`|`filesystem`|`blob`), `JOB_STORAGE_DIR`,
    /// `WEEKLY_TARGET_FULL_TIME_MINUTES`, `WEEKLY_TARGET_PART_TIME_MINUTES`.
    pub fn from_env() -> PlanningResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PlanningResult<Self> {
        let solver_timeout = match lookup("SOLVER_TIMEOUT_SECONDS") {
            Some(raw) => {
                let seconds: u64 = raw.parse().map_err(|_| {
                    PlanningError::invalid_input(format!(
                        "SOLVER_TIMEOUT_SECONDS must be an integer, got '{raw}'"
                    ))
                })?;
                Duration::from_secs(seconds)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        };

        let log_level = match lookup("SOLVER_LOG_LEVEL") {
            Some(raw) => raw.parse().map_err(|_| {
                PlanningError::invalid_input(format!(
                    "SOLVER_LOG_LEVEL must be INFO or DEBUG, got '{raw}'"
                ))
            })?,
            None => LogLevel::Info,
        };

        let storage_dir = lookup("JOB_STORAGE_DIR").unwrap_or_else(|| DEFAULT_STORAGE_DIR.into());
        let storage = match lookup("JOB_STORAGE_TYPE").as_deref() {
            None | Some("filesystem") => StorageConfig::Filesystem(PathBuf::from(storage_dir)),
            Some("memory") => StorageConfig::Memory,
            Some("blob") => {
                return Err(PlanningError::invalid_input(
                    "JOB_STORAGE_TYPE=blob requires an out-of-core blob driver; \
                     use memory or filesystem",
                ))
            }
            Some(other) => {
                return Err(PlanningError::invalid_input(format!(
                    "JOB_STORAGE_TYPE must be memory, filesystem or blob, got '{other}'"
                )))
            }
        };

        let mut evaluator = EvaluatorConfig::default();
        if let Some(raw) = lookup("WEEKLY_TARGET_FULL_TIME_MINUTES") {
            evaluator.full_time_target_minutes = parse_minutes("WEEKLY_TARGET_FULL_TIME_MINUTES", &raw)?;
        }
        if let Some(raw) = lookup("WEEKLY_TARGET_PART_TIME_MINUTES") {
            evaluator.part_time_target_minutes = parse_minutes("WEEKLY_TARGET_PART_TIME_MINUTES", &raw)?;
        }

        Ok(Self {
            solver_timeout,
            log_level,
            storage,
            evaluator,
        })
    }

    /// The solver configuration implied by this app configuration.
    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            time_budget: self.solver_timeout,
            log_level: self.log_level,
            seed: None,
            evaluator: self.evaluator.clone(),
        }
    }
}

fn parse_minutes(key: &str, raw: &str) -> PlanningResult<i64> {
    let minutes: i64 = raw.parse().map_err(|_| {
        PlanningError::invalid_input(format!("{key} must be an integer, got '{raw}'"))
    })?;
    if minutes < 0 {
        return Err(PlanningError::invalid_input(format!(
            "{key} must be non-negative, got {minutes}"
        )));
    }
    Ok(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.solver_timeout, Duration::from_secs(120));
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(
            config.storage,
            StorageConfig::Filesystem(PathBuf::from("./job_storage"))
        );
        assert_eq!(config.evaluator.full_time_target_minutes, 2400);
        assert_eq!(config.evaluator.part_time_target_minutes, 1200);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SOLVER_TIMEOUT_SECONDS", "30"),
            ("SOLVER_LOG_LEVEL", "DEBUG"),
            ("JOB_STORAGE_TYPE", "memory"),
            ("WEEKLY_TARGET_FULL_TIME_MINUTES", "2280"),
            ("WEEKLY_TARGET_PART_TIME_MINUTES", "960"),
        ]))
        .unwrap();
        assert_eq!(config.solver_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.evaluator.full_time_target_minutes, 2280);
        assert_eq!(config.evaluator.part_time_target_minutes, 960);
    }

    #[test]
    fn storage_dir_feeds_the_filesystem_backend() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("JOB_STORAGE_TYPE", "filesystem"),
            ("JOB_STORAGE_DIR", "/var/lib/shift-planner/jobs"),
        ]))
        .unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::Filesystem(PathBuf::from("/var/lib/shift-planner/jobs"))
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("SOLVER_TIMEOUT_SECONDS", "soon")]))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err =
            AppConfig::from_lookup(lookup_from(&[("SOLVER_LOG_LEVEL", "TRACE")])).unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err =
            AppConfig::from_lookup(lookup_from(&[("JOB_STORAGE_TYPE", "s3")])).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn blob_backend_is_rejected_as_misconfiguration() {
        let err =
            AppConfig::from_lookup(lookup_from(&[("JOB_STORAGE_TYPE", "blob")])).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }
}
