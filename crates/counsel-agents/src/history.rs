use std::sync::Arc;

use counsel_common::{Error, Result};
use counsel_db::CounselStore;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::prompt::{SUMMARY_SYSTEM_PROMPT, build_summary_prompt};
use crate::providers::{LlmProvider, LlmRequest};

/// One user message paired with the assistant's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user_text: String,
    pub assistant_text: String,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    /// Rotate whenever the turn count is a multiple of this.
    pub rotate_every: usize,
    /// Turns rendered next to a running summary.
    pub recent_turns: usize,
    /// Summaries shorter than this (in chars) are not persisted.
    pub min_summary_chars: usize,
    /// Model for summarization; falls back to the session's last model.
    pub summary_model: Option<String>,
    pub fallback_model: String,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            rotate_every: 5,
            recent_turns: 5,
            min_summary_chars: 10,
            summary_model: None,
            fallback_model: "gpt-4o".to_string(),
        }
    }
}

/// In-memory conversation state for one user id.
#[derive(Debug)]
pub struct UserSession {
    user_id: String,
    turns: Vec<Turn>,
    running_summary: Option<String>,
    prior_summary: Option<String>,
    prior_loaded: bool,
    recent_turns: usize,
    last_model: Option<String>,
}

impl UserSession {
    pub fn new(user_id: impl Into<String>, recent_turns: usize) -> Self {
        Self {
            user_id: user_id.into(),
            turns: Vec::new(),
            running_summary: None,
            prior_summary: None,
            prior_loaded: false,
            recent_turns,
            last_model: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn append_turn(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.turns.push(Turn {
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
        });
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn running_summary(&self) -> Option<&str> {
        self.running_summary.as_deref()
    }

    pub fn prior_summary(&self) -> Option<&str> {
        self.prior_summary.as_deref()
    }

    /// Record the latest stored summary from an earlier session. Only the
    /// first call has an effect.
    pub fn set_prior_summary(&mut self, summary: Option<String>) {
        if !self.prior_loaded {
            self.prior_summary = summary.filter(|s| !s.trim().is_empty());
            self.prior_loaded = true;
        }
    }

    pub fn prior_loaded(&self) -> bool {
        self.prior_loaded
    }

    pub fn set_last_model(&mut self, model: &str) {
        self.last_model = Some(model.to_string());
    }

    pub fn last_model(&self) -> Option<&str> {
        self.last_model.as_deref()
    }

    pub fn rotation_due(&self, every: usize) -> bool {
        every > 0 && !self.turns.is_empty() && self.turns.len() % every == 0
    }

    /// Render the history block for the reply prompt.
    ///
    /// With a running summary: the summary plus at most the last
    /// `recent_turns` turns. Without one: every turn in memory.
    pub fn build_history_text(&self) -> String {
        match self.running_summary() {
            Some(summary) => {
                let start = self.turns.len().saturating_sub(self.recent_turns);
                let recent = render_turns(&self.turns[start..]);
                if recent.is_empty() {
                    format!("[대화 요약]\n{summary}")
                } else {
                    format!("[대화 요약]\n{summary}\n\n[최근 대화]\n{recent}")
                }
            }
            None => render_turns(&self.turns),
        }
    }

    /// Running summary plus every turn, for name discovery.
    pub fn full_transcript(&self) -> String {
        let turns = render_turns(&self.turns);
        match self.running_summary() {
            Some(summary) if turns.is_empty() => summary.to_string(),
            Some(summary) => format!("{summary}\n\n{turns}"),
            None => turns,
        }
    }

    /// The summary a rotation should extend: this session's running summary,
    /// or the prior-session summary before the first rotation.
    fn summary_base(&self) -> Option<&str> {
        self.running_summary().or(self.prior_summary())
    }
}

pub fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("사용자: {}\n상담사: {}", t.user_text, t.assistant_text))
        .collect::<Vec<_>>()
        .join("\n")
}

struct SessionSlot {
    session: Arc<Mutex<UserSession>>,
    connections: usize,
}

/// Owns per-user sessions and rotates their turns into persisted summaries.
pub struct HistoryManager {
    provider: Arc<dyn LlmProvider>,
    store: Arc<CounselStore>,
    settings: HistorySettings,
    sessions: DashMap<String, SessionSlot>,
}

impl HistoryManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<CounselStore>,
        settings: HistorySettings,
    ) -> Self {
        Self {
            provider,
            store,
            settings,
            sessions: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &HistorySettings {
        &self.settings
    }

    /// The session for `user_id`, created empty on first use.
    pub fn session(&self, user_id: &str) -> Arc<Mutex<UserSession>> {
        self.sessions
            .entry(user_id.to_string())
            .or_insert_with(|| self.new_slot(user_id))
            .session
            .clone()
    }

    /// Register a connection as using `user_id`'s session.
    pub fn attach(&self, user_id: &str) {
        let mut slot = self
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| self.new_slot(user_id));
        slot.connections += 1;
        debug!(user_id, connections = slot.connections, "session attached");
    }

    /// Drop a connection's claim on a session. Returns the session when no
    /// connection is left. The slot stays in the map so a reconnect finds
    /// the same session; call [`HistoryManager::evict_if_idle`] once it has
    /// been flushed.
    pub fn release(&self, user_id: &str) -> Option<Arc<Mutex<UserSession>>> {
        let mut slot = self.sessions.get_mut(user_id)?;
        slot.connections = slot.connections.saturating_sub(1);
        debug!(user_id, connections = slot.connections, "session released");
        (slot.connections == 0).then(|| slot.session.clone())
    }

    /// Remove `user_id`'s slot unless a connection re-attached since
    /// [`HistoryManager::release`]. Returns `true` when it was removed.
    pub fn evict_if_idle(&self, user_id: &str, session: &Arc<Mutex<UserSession>>) -> bool {
        self.sessions
            .remove_if(user_id, |_, slot| {
                slot.connections == 0 && Arc::ptr_eq(&slot.session, session)
            })
            .is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn new_slot(&self, user_id: &str) -> SessionSlot {
        SessionSlot {
            session: Arc::new(Mutex::new(UserSession::new(
                user_id,
                self.settings.recent_turns,
            ))),
            connections: 0,
        }
    }

    /// Load the prior-session summary into a fresh session.
    pub fn load_prior_summary(&self, session: &mut UserSession) {
        if session.prior_loaded() {
            return;
        }
        match self.store.latest_summary(session.user_id()) {
            Ok(row) => session.set_prior_summary(row.map(|r| r.content)),
            Err(e) => {
                warn!(user_id = session.user_id(), "failed to load prior summary: {e}");
                session.set_prior_summary(None);
            }
        }
    }

    /// Rotate when the turn count is a multiple of `rotate_every`.
    ///
    /// Returns `Ok(true)` when the turns were folded into a new running
    /// summary and cleared. On a summarization error the turns are kept.
    pub async fn maybe_rotate(&self, session: &mut UserSession) -> Result<bool> {
        if !session.rotation_due(self.settings.rotate_every) {
            return Ok(false);
        }
        self.rotate(session).await?;
        Ok(true)
    }

    /// Summarize whatever turns remain, regardless of the modulus. Used when
    /// the last connection for a user goes away.
    pub async fn flush(&self, session: &mut UserSession) -> Result<bool> {
        if session.turns.is_empty() {
            return Ok(false);
        }
        self.rotate(session).await?;
        Ok(true)
    }

    async fn rotate(&self, session: &mut UserSession) -> Result<()> {
        let summary = self.summarize(session).await?;
        self.persist_summary(session.user_id(), &summary);

        let turns = session.turns.len();
        session.turns.clear();
        if !summary.is_empty() {
            session.running_summary = Some(summary);
        }
        info!(
            user_id = session.user_id(),
            turns, "rotated conversation into running summary"
        );
        Ok(())
    }

    async fn summarize(&self, session: &UserSession) -> Result<String> {
        let model = self
            .settings
            .summary_model
            .as_deref()
            .or(session.last_model())
            .unwrap_or(self.settings.fallback_model.as_str());

        let prompt = build_summary_prompt(session.summary_base(), &render_turns(&session.turns));
        let request = LlmRequest::single_prompt(model, prompt)
            .with_system(SUMMARY_SYSTEM_PROMPT)
            .with_temperature(0.0);

        let response = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| Error::Agent(format!("summarization failed: {e}")))?;
        Ok(response.text.trim().to_string())
    }

    /// Append the summary to storage unless it is too short to be useful.
    /// Storage failures are logged; the in-memory rotation still happens.
    fn persist_summary(&self, user_id: &str, summary: &str) -> bool {
        let length = summary.chars().count();
        if length < self.settings.min_summary_chars {
            debug!(user_id, length, "skipping trivial summary");
            return false;
        }
        match self.store.insert_summary(user_id, summary) {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, "failed to persist summary: {e}");
                false
            }
        }
    }
}
