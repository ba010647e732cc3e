//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::agent::state::QueueDrainMode;
use crate::error::{EngineError, Result};

pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const CONFIG_PATH_ENV: &str = "TURN_ENGINE_CONFIG";
const MAX_TURNS_ENV: &str = "TURN_ENGINE_MAX_TURNS";
const MAX_TOKENS_ENV: &str = "TURN_ENGINE_MAX_TOKENS";
const TEMPERATURE_ENV: &str = "TURN_ENGINE_TEMPERATURE";
const STEERING_MODE_ENV: &str = "TURN_ENGINE_STEERING_MODE";
const FOLLOW_UP_MODE_ENV: &str = "TURN_ENGINE_FOLLOW_UP_MODE";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Limits and sampling defaults applied to each new conversation state.
///
/// ```
/// use turn_engine::config::EngineConfig;
///
/// let config = EngineConfig::builder().max_turns(5).temperature(0.2).build();
/// assert_eq!(config.max_turns, 5);
/// assert_eq!(config.max_tokens, turn_engine::config::DEFAULT_MAX_TOKENS);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct EngineConfig {
    #[builder(default = DEFAULT_MAX_TURNS)]
    pub max_turns: usize,
    #[builder(default = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    #[builder(default)]
    pub steering_mode: QueueDrainMode,
    #[builder(default)]
    pub follow_up_mode: QueueDrainMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            steering_mode: QueueDrainMode::All,
            follow_up_mode: QueueDrainMode::All,
        }
    }
}

impl EngineConfig {
    /// Resolve the full layered configuration.
    ///
    /// Reads the TOML file named by `TURN_ENGINE_CONFIG` (or the default
    /// `~/.turn-engine/config.toml` when present), then applies environment
    /// overrides. A `.env` file is loaded first if one exists.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| Some(default_config_path()).filter(|p| p.exists()));
        let base = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        base.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::default().apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| EngineError::Configuration(format!("invalid config: {err}")))?;
        config.validate()
    }

    /// Apply `TURN_ENGINE_*` overrides read through `lookup`.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(MAX_TURNS_ENV) {
            self.max_turns = parse_positive(MAX_TURNS_ENV, &value)?;
        }
        if let Some(value) = lookup(MAX_TOKENS_ENV) {
            self.max_tokens = u32::try_from(parse_positive(MAX_TOKENS_ENV, &value)?)
                .map_err(|_| EngineError::Configuration(format!("{MAX_TOKENS_ENV} out of range")))?;
        }
        if let Some(value) = lookup(TEMPERATURE_ENV) {
            let parsed = value.trim().parse::<f64>().map_err(|_| {
                EngineError::Configuration(format!("{TEMPERATURE_ENV} must be a number, got '{value}'"))
            })?;
            self.temperature = Some(parsed);
        }
        if let Some(value) = lookup(STEERING_MODE_ENV) {
            self.steering_mode = parse_mode(STEERING_MODE_ENV, &value)?;
        }
        if let Some(value) = lookup(FOLLOW_UP_MODE_ENV) {
            self.follow_up_mode = parse_mode(FOLLOW_UP_MODE_ENV, &value)?;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.max_turns == 0 {
            return Err(EngineError::Configuration("max_turns must be at least 1".into()));
        }
        if self.max_tokens == 0 {
            return Err(EngineError::Configuration("max_tokens must be at least 1".into()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(EngineError::Configuration(format!(
                    "temperature must be within 0.0..=2.0, got {t}"
                )));
            }
        }
        Ok(self)
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(EngineError::Configuration(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}

fn parse_mode(key: &str, value: &str) -> Result<QueueDrainMode> {
    value.trim().parse::<QueueDrainMode>().map_err(|_| {
        EngineError::Configuration(format!(
            "{key} must be 'all' or 'one_at_a_time', got '{value}'"
        ))
    })
}

fn default_config_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".turn-engine"))
        .unwrap_or_else(|| PathBuf::from(".turn-engine"))
        .join(CONFIG_FILE_NAME)
}
