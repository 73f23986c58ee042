//! Logging bootstrap for the transcription core.
//!
//! # Responsibility
//! - Start the rolling file logger once per process from `CoreConfig`.
//! - Log captured panics as one sanitized line.
//!
//! # Invariants
//! - Events carry ids, counts and durations, never transcribed text.
//! - A second start with the same level and directory is a no-op; any other
//!   combination is a `LoggingError::Conflict`.

use crate::config::{ConfigError, CoreConfig};
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "transcript";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 4;
const PANIC_PAYLOAD_CHARS: usize = 160;

/// Accepted level spellings and their canonical name.
const LEVEL_NAMES: &[(&str, &str)] = &[
    ("trace", "trace"),
    ("debug", "debug"),
    ("info", "info"),
    ("warn", "warn"),
    ("warning", "warn"),
    ("error", "error"),
];

static BACKEND: OnceCell<Backend> = OnceCell::new();

/// Level and directory of the running logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLogging {
    pub level: &'static str,
    pub log_dir: PathBuf,
}

struct Backend {
    active: ActiveLogging,
    _handle: LoggerHandle,
}

/// Logger startup failures.
#[derive(Debug)]
pub enum LoggingError {
    Config(ConfigError),
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Backend(String),
    /// Logger already runs with another level or directory.
    Conflict {
        active: ActiveLogging,
        requested_level: &'static str,
        requested_dir: PathBuf,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::CreateDir { path, source } => {
                write!(f, "cannot create log directory `{}`: {source}", path.display())
            }
            Self::Backend(message) => write!(f, "logger backend failed to start: {message}"),
            Self::Conflict {
                active,
                requested_level,
                requested_dir,
            } => write!(
                f,
                "logging already runs at level `{}` in `{}`; cannot switch to `{requested_level}` in `{}`",
                active.level,
                active.log_dir.display(),
                requested_dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(_) | Self::Conflict { .. } => None,
        }
    }
}

impl From<ConfigError> for LoggingError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Starts file logging at `level` under the absolute directory `log_dir`.
pub fn init_logging(level: &str, log_dir: &Path) -> Result<(), LoggingError> {
    let level = normalize_level(level).map_err(ConfigError::InvalidLogLevel)?;
    if !log_dir.is_absolute() {
        return Err(ConfigError::RelativeLogDir(log_dir.to_path_buf()).into());
    }

    let backend = BACKEND.get_or_try_init(|| start_backend(level, log_dir))?;
    if backend.active.level == level && backend.active.log_dir == log_dir {
        return Ok(());
    }
    Err(LoggingError::Conflict {
        active: backend.active.clone(),
        requested_level: level,
        requested_dir: log_dir.to_path_buf(),
    })
}

/// Starts logging when `config.log_dir` is set; returns whether it did.
pub fn init_logging_from_config(config: &CoreConfig) -> Result<bool, LoggingError> {
    match &config.log_dir {
        Some(dir) => init_logging(&config.log_level, dir).map(|()| true),
        None => Ok(false),
    }
}

pub fn logging_status() -> Option<ActiveLogging> {
    BACKEND.get().map(|backend| backend.active.clone())
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub(crate) fn normalize_level(level: &str) -> Result<&'static str, String> {
    let wanted = level.trim();
    LEVEL_NAMES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(wanted))
        .map(|&(_, name)| name)
        .ok_or_else(|| {
            format!("unsupported log level `{wanted}`; expected trace, debug, info, warn or error")
        })
}

fn start_backend(level: &'static str, log_dir: &Path) -> Result<Backend, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_start module=logging status=ok version={} os={} level={level} log_dir={}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        log_dir.display()
    );

    Ok(Backend {
        active: ActiveLogging {
            level,
            log_dir: log_dir.to_path_buf(),
        },
        _handle: handle,
    })
}

fn install_panic_hook() {
    static INSTALLED: OnceCell<()> = OnceCell::new();
    if INSTALLED.set(()).is_err() {
        return;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map_or_else(
            || "unknown".to_string(),
            |at| format!("{}:{}", at.file(), at.line()),
        );
        error!(
            "event=panic_captured module=logging status=error location={location} payload={}",
            panic_summary(info.payload())
        );
        previous(info);
    }));
}

fn panic_summary(payload: &(dyn Any + Send)) -> String {
    let text = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    single_line(text, PANIC_PAYLOAD_CHARS)
}

/// Replaces line breaks with spaces and caps the length at `max_chars`.
fn single_line(text: &str, max_chars: usize) -> String {
    let mut line: String = text
        .chars()
        .take(max_chars)
        .map(|c| if matches!(c, '\n' | '\r') { ' ' } else { c })
        .collect();
    if text.chars().nth(max_chars).is_some() {
        line.push_str("...");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, init_logging_from_config, logging_status, normalize_level, panic_summary,
        single_line, LoggingError,
    };
    use crate::config::{ConfigError, CoreConfig};
    use std::path::Path;

    #[test]
    fn level_aliases_normalize_case_insensitively() {
        assert_eq!(normalize_level(" Warning ").unwrap(), "warn");
        assert_eq!(normalize_level("TRACE").unwrap(), "trace");
        assert!(normalize_level("verbose").is_err());
    }

    #[test]
    fn relative_directory_is_rejected_before_start() {
        let err = init_logging("info", Path::new("logs")).unwrap_err();
        assert!(matches!(
            err,
            LoggingError::Config(ConfigError::RelativeLogDir(_))
        ));
    }

    #[test]
    fn single_line_flattens_and_truncates() {
        assert_eq!(single_line("acte\nmarge", 20), "acte marge");
        assert_eq!(single_line("abcdef", 3), "abc...");
        assert_eq!(single_line("abc", 3), "abc");
    }

    #[test]
    fn panic_summary_reads_both_string_payloads() {
        let owned: Box<dyn std::any::Any + Send> = Box::new("owned\rtext".to_string());
        assert_eq!(panic_summary(&*owned), "owned text");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_summary(&*other), "non-string panic payload");
    }

    #[test]
    fn config_without_log_dir_leaves_logging_off() {
        let config = CoreConfig {
            log_dir: None,
            ..CoreConfig::default()
        };
        assert!(!init_logging_from_config(&config).unwrap());
    }

    #[test]
    fn restart_with_same_settings_is_noop_and_conflicts_are_rejected() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            log_level: "info".to_string(),
            log_dir: Some(first.path().to_path_buf()),
            ..CoreConfig::default()
        };

        assert!(init_logging_from_config(&config).unwrap());
        assert!(init_logging_from_config(&config).unwrap());

        assert!(matches!(
            init_logging("debug", first.path()),
            Err(LoggingError::Conflict { .. })
        ));
        assert!(matches!(
            init_logging("info", second.path()),
            Err(LoggingError::Conflict { .. })
        ));

        let active = logging_status().unwrap();
        assert_eq!(active.level, "info");
        assert_eq!(active.log_dir, first.path());
    }
}
