use std::sync::Arc;

use counsel_agents::{CounselRuntime, HistorySettings, LlmProvider, OpenAiProvider, RuntimeSettings};
use counsel_common::{Error, Result};
use counsel_config::AppConfig;
use counsel_db::CounselStore;
use tracing::info;

/// Build the runtime from config: OpenAI provider plus the SQLite store.
pub fn build_runtime(config: &AppConfig) -> Result<CounselRuntime> {
    let api_key = config
        .llm
        .api_key
        .clone()
        .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

    let provider = OpenAiProvider::new(api_key, Some(config.llm.base_url.clone()));
    let store = CounselStore::open(&config.database.path)?;
    info!(
        database = %config.database.path.display(),
        base_url = %config.llm.base_url,
        "counsel runtime ready"
    );

    Ok(build_runtime_with(
        config,
        Arc::new(provider),
        Arc::new(store),
    ))
}

/// Build the runtime around an existing provider and store.
pub fn build_runtime_with(
    config: &AppConfig,
    provider: Arc<dyn LlmProvider>,
    store: Arc<CounselStore>,
) -> CounselRuntime {
    CounselRuntime::new(provider, store, runtime_settings(config))
}

pub fn runtime_settings(config: &AppConfig) -> RuntimeSettings {
    RuntimeSettings {
        history: HistorySettings {
            rotate_every: config.memory.rotate_every,
            recent_turns: config.memory.recent_turns,
            min_summary_chars: config.memory.min_summary_chars,
            summary_model: config.llm.summary_model.clone(),
            fallback_model: config.llm.default_model.clone(),
        },
        reply_timeout: config.llm.reply_timeout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = build_runtime(&AppConfig::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.memory.rotate_every = 3;
        config.llm.summary_model = Some("gpt-4o-mini".to_string());
        config.llm.reply_timeout_secs = 5;

        let settings = runtime_settings(&config);
        assert_eq!(settings.history.rotate_every, 3);
        assert_eq!(settings.history.summary_model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(settings.history.fallback_model, "gpt-4o");
        assert_eq!(settings.reply_timeout.as_secs(), 5);
    }
}
