//! Configuration types.
//!
//! Everything is resolved from environment variables once at startup. The
//! orchestration loop only ever sees already-resolved values.

use std::path::PathBuf;
use std::time::Duration;

use crate::channels::email::EmailConfig;
use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// Default poll interval when `CHECK_INTERVAL` is unset.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;

/// Settings consumed by the orchestration loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Time between inbox polls.
    pub poll_interval: Duration,
    /// Reply at most once per sender for the lifetime of the ledger.
    pub reply_once: bool,
    /// Granularity at which sleeps observe the shutdown flag.
    pub tick: Duration,
    /// Pause after an iteration fails unexpectedly.
    pub error_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            reply_once: true,
            tick: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl LoopConfig {
    /// Read `CHECK_INTERVAL` and `REPLY_ONCE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_secs = match std::env::var("CHECK_INTERVAL") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "CHECK_INTERVAL".into(),
                    message: e.to_string(),
                })?,
            Err(_) => DEFAULT_CHECK_INTERVAL_SECS,
        };

        let reply_once = std::env::var("REPLY_ONCE")
            .map(|v| parse_toggle(&v))
            .unwrap_or(true);

        Ok(Self {
            poll_interval: Duration::from_secs(poll_secs),
            reply_once,
            ..Self::default()
        })
    }
}

/// `REPLY_ONCE` is enabled only by a case-insensitive `true`.
pub fn parse_toggle(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// On-disk locations for personas, the fallback message, the ledger and logs.
#[derive(Debug, Clone)]
pub struct Paths {
    pub characters_dir: PathBuf,
    pub fallback_path: PathBuf,
    pub ledger_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Paths {
    /// Layout rooted at `home`.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            characters_dir: home.join("characters"),
            fallback_path: home.join("reply.json"),
            ledger_path: home.join("replied_senders.csv"),
            log_dir: home.join("logs"),
        }
    }

    /// Resolve from `PERSONA_REPLY_HOME` plus per-path overrides.
    pub fn from_env() -> Self {
        let home = std::env::var("PERSONA_REPLY_HOME").unwrap_or_else(|_| ".".to_string());
        let defaults = Self::under(home);
        let pick = |key: &str, fallback: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(fallback)
        };

        Self {
            characters_dir: pick("PERSONA_REPLY_CHARACTERS_DIR", defaults.characters_dir),
            fallback_path: pick("PERSONA_REPLY_FALLBACK_PATH", defaults.fallback_path),
            ledger_path: pick("PERSONA_REPLY_LEDGER_PATH", defaults.ledger_path),
            log_dir: pick("PERSONA_REPLY_LOG_DIR", defaults.log_dir),
        }
    }
}

/// Full daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub run: LoopConfig,
    pub llm: LlmConfig,
    pub email: EmailConfig,
    pub paths: Paths,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            run: LoopConfig::from_env()?,
            llm: LlmConfig::from_env(),
            email: EmailConfig::from_env()?,
            paths: Paths::from_env(),
        })
    }
}
