use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use counsel_agents::CounselRuntime;
use counsel_common::RequestDefaults;
use counsel_config::AppConfig;

/// Shared gateway state, handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub runtime: Arc<CounselRuntime>,
    /// Fallbacks for fields a request leaves out.
    pub defaults: RequestDefaults,
    pub started_at: DateTime<Utc>,
    connections: AtomicUsize,
}

impl AppState {
    pub fn new(config: AppConfig, runtime: Arc<CounselRuntime>) -> Self {
        let defaults = RequestDefaults {
            model: config.llm.default_model.clone(),
            temperature: config.llm.default_temperature,
            user_id: config.gateway.default_user_id.clone(),
        };
        Self {
            config,
            runtime,
            defaults,
            started_at: Utc::now(),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn connection_opened(&self) -> usize {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

pub type SharedState = Arc<AppState>;
