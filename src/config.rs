//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::conversation::MAX_TURNS_PER_CONVERSATION;
use crate::generation::{GeneratorConfig, DEFAULT_TIMEOUT};

/// Startup configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{what} not configured: {hint}")]
    Missing { what: &'static str, hint: String },
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub bot_token: String,

    /// System directive ("personality") prepended to every prompt
    pub system_prompt: String,

    /// JSON file holding every conversation
    pub history_path: PathBuf,

    /// Turns kept per conversation before a new one is appended
    pub history_window: usize,

    /// Generation CLI
    pub generator: GeneratorConfig,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// `token.cfg` / `personality.cfg` in the working directory
    pub fn from_env() -> Result<Self, ConfigError> {
        let token_file = env_path("RELAY_TOKEN_FILE", "token.cfg");
        let bot_token = match non_empty_var("TELEGRAM_BOT_TOKEN") {
            Some(token) => token,
            None => read_trimmed(&token_file).ok_or_else(|| ConfigError::Missing {
                what: "Bot token",
                hint: format!(
                    "set TELEGRAM_BOT_TOKEN or put the token in {}",
                    token_file.display()
                ),
            })?,
        };

        let personality_file = env_path("RELAY_PERSONALITY_FILE", "personality.cfg");
        let system_prompt = match non_empty_var("RELAY_SYSTEM_PROMPT") {
            Some(prompt) => prompt,
            None => read_trimmed(&personality_file).ok_or_else(|| ConfigError::Missing {
                what: "Bot personality",
                hint: format!(
                    "set RELAY_SYSTEM_PROMPT or write it to {}",
                    personality_file.display()
                ),
            })?,
        };

        let history_path = env_path("RELAY_HISTORY_FILE", "chat_histories.json");

        let history_window = parse_var("RELAY_HISTORY_WINDOW")?.unwrap_or(MAX_TURNS_PER_CONVERSATION);

        let timeout = parse_var::<u64>("RELAY_GENERATION_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let defaults = GeneratorConfig::default();
        let generator = GeneratorConfig {
            program: non_empty_var("RELAY_GENERATOR_BIN").unwrap_or(defaults.program),
            args: non_empty_var("RELAY_GENERATOR_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.args),
            model: non_empty_var("RELAY_MODEL").unwrap_or(defaults.model),
            timeout,
        };

        Ok(Self {
            bot_token,
            system_prompt,
            history_path,
            history_window,
            generator,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(name: &str, default: &str) -> PathBuf {
    non_empty_var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty_var(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var: name, value }),
        None => Ok(None),
    }
}

/// File contents, trimmed; `None` if unreadable or blank
fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
