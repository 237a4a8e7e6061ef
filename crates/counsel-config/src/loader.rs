use std::path::{Path, PathBuf};
use std::str::FromStr;

use counsel_common::{Error, Result};

use crate::model::{AppConfig, LogFormat};

/// Builds an [`AppConfig`] from environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read an optional `.env` file, then the process environment.
    ///
    /// Returns the `.env` file that was applied, if any. Nothing is logged
    /// here since tracing is configured from the result.
    pub fn load() -> Result<(AppConfig, Option<PathBuf>)> {
        let env_file = Self::load_env_file(None)?;
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        Ok((config, env_file))
    }

    /// Apply `path`, or the nearest `.env` when `None`, to the process
    /// environment. A missing file is not an error.
    pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
        let loaded = match path {
            Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
            None => dotenvy::dotenv(),
        };
        match loaded {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(Error::Config(format!("failed to read .env: {e}"))),
        }
    }

    /// Build the config from an arbitrary key lookup. Blank values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = AppConfig::default();

        if let Some(host) = get("HOST") {
            config.gateway.host = host;
        }
        if let Some(port) = get("PORT") {
            config.gateway.port = parse("PORT", &port)?;
        }
        if let Some(limit) = get("MAX_MESSAGE_BYTES") {
            config.gateway.max_message_bytes = parse("MAX_MESSAGE_BYTES", &limit)?;
        }
        if let Some(user_id) = get("DEFAULT_USER_ID") {
            config.gateway.default_user_id = user_id;
        }

        config.llm.api_key = get("OPENAI_API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("DEFAULT_MODEL") {
            config.llm.default_model = model;
        }
        if let Some(temperature) = get("DEFAULT_TEMPERATURE") {
            let temperature: f64 = parse("DEFAULT_TEMPERATURE", &temperature)?;
            if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
                return Err(Error::Config(format!(
                    "DEFAULT_TEMPERATURE must be between 0 and 2, got {temperature}"
                )));
            }
            config.llm.default_temperature = temperature;
        }
        config.llm.summary_model = get("SUMMARY_MODEL");
        if let Some(secs) = get("REPLY_TIMEOUT_SECS") {
            config.llm.reply_timeout_secs = parse("REPLY_TIMEOUT_SECS", &secs)?;
        }

        if let Some(path) = get("DATABASE_PATH") {
            config.database.path = PathBuf::from(path);
        }

        if let Some(every) = get("ROTATE_EVERY") {
            config.memory.rotate_every = parse("ROTATE_EVERY", &every)?;
            if config.memory.rotate_every == 0 {
                return Err(Error::Config("ROTATE_EVERY must be at least 1".to_string()));
            }
        }
        if let Some(turns) = get("RECENT_TURNS") {
            config.memory.recent_turns = parse("RECENT_TURNS", &turns)?;
        }
        if let Some(chars) = get("MIN_SUMMARY_CHARS") {
            config.memory.min_summary_chars = parse("MIN_SUMMARY_CHARS", &chars)?;
        }

        if let Some(format) = get("LOG_FORMAT") {
            config.logging.format = match format.to_ascii_lowercase().as_str() {
                "text" | "pretty" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(Error::Config(format!(
                        "LOG_FORMAT must be `text` or `json`, got `{other}`"
                    )));
                }
            };
        }

        Ok(config)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key} (`{value}`): {e}")))
}
