//! Runtime configuration for the transcription core.
//!
//! # Responsibility
//! - Collect store path, logging, and reconciliation settings in one place.
//! - Read overrides from `TRANSCRIPT_*` environment variables.
//!
//! # Invariants
//! - `log_level` is always a normalized level name.
//! - `log_dir`, when set, is absolute.

use crate::logging::{default_log_level, normalize_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "TRANSCRIPT_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "TRANSCRIPT_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "TRANSCRIPT_LOG_DIR";
pub const ENV_RECONCILE: &str = "TRANSCRIPT_RECONCILE";

/// When the session re-fetches the tree from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Re-fetch only after a failed write.
    #[default]
    OnFailure,
    /// Also re-fetch after every successful structural change.
    Always,
}

impl ReconcilePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on_failure" | "on-failure" => Some(Self::OnFailure),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidLogLevel(String),
    RelativeLogDir(PathBuf),
    InvalidReconcilePolicy(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLogLevel(message) => write!(f, "{message}"),
            Self::RelativeLogDir(path) => {
                write!(f, "log_dir must be an absolute path, got `{}`", path.display())
            }
            Self::InvalidReconcilePolicy(value) => write!(
                f,
                "unsupported reconcile policy `{value}`; expected on_failure|always"
            ),
        }
    }
}

impl Error for ConfigError {}

/// Core runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite store file.
    pub db_path: Option<PathBuf>,
    pub log_level: String,
    /// Rolling log directory; `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            reconcile_policy: ReconcilePolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Builds configuration from defaults plus process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from defaults plus `lookup` overrides.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(policy) = get(ENV_RECONCILE) {
            config.reconcile_policy = ReconcilePolicy::parse(&policy)
                .ok_or(ConfigError::InvalidReconcilePolicy(policy))?;
        }

        config.validate()
    }

    /// Normalizes the level and checks the log directory.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.log_level = normalize_level(&self.log_level)
            .map_err(ConfigError::InvalidLogLevel)?
            .to_string();
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::RelativeLogDir(dir.clone()));
            }
        }
        Ok(self)
    }
}
