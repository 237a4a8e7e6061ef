use std::sync::Arc;
use std::time::Duration;

use counsel_common::{CounselRequest, Result};
use counsel_db::CounselStore;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::history::{HistoryManager, HistorySettings, UserSession};
use crate::identity::IdentityResolver;
use crate::prompt::{PromptInputs, build_prompt};
use crate::providers::{LlmProvider, LlmRequest};
use crate::stream::ReplyStream;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub history: HistorySettings,
    /// Bound on waiting for the provider to start or continue a stream.
    pub reply_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            history: HistorySettings::default(),
            reply_timeout: Duration::from_secs(60),
        }
    }
}

/// A reply being streamed for one request.
///
/// Holds the user's session lock until [`CounselRuntime::complete_turn`], so
/// requests for the same user never interleave.
pub struct PendingReply {
    pub replies: ReplyStream,
    request: CounselRequest,
    session: OwnedMutexGuard<UserSession>,
}

impl PendingReply {
    pub fn request(&self) -> &CounselRequest {
        &self.request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    /// In-memory turns after the request (0 right after a rotation).
    pub turn_count: usize,
    pub rotated: bool,
}

/// Relays counseling requests to the LLM and keeps per-user memory.
pub struct CounselRuntime {
    provider: Arc<dyn LlmProvider>,
    store: Arc<CounselStore>,
    history: HistoryManager,
    identity: IdentityResolver,
    reply_timeout: Duration,
}

impl CounselRuntime {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<CounselStore>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            history: HistoryManager::new(provider.clone(), store.clone(), settings.history),
            identity: IdentityResolver::new(provider.clone(), store.clone()),
            provider,
            store,
            reply_timeout: settings.reply_timeout,
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    /// Claim `user_id`'s session for a connection.
    pub fn attach(&self, user_id: &str) {
        self.history.attach(user_id);
    }

    /// Assemble the prompt and open the reply stream.
    ///
    /// Storage failures are logged and the reply goes ahead; provider
    /// failures and timeouts are returned.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, model = %request.model))]
    pub async fn begin_turn(&self, request: CounselRequest) -> Result<PendingReply> {
        let mut session = self.history.session(&request.user_id).lock_owned().await;

        if let Err(e) = self.identity.ensure_user(&request.user_id) {
            warn!("failed to ensure user record: {e}");
        }
        self.history.load_prior_summary(&mut session);
        session.set_last_model(&request.model);

        let user_name = self.identity.known_name(&request.user_id).unwrap_or_else(|e| {
            warn!("failed to load user name: {e}");
            None
        });

        let history_text = session.build_history_text();
        let has_running_summary = session.running_summary().is_some();
        // A running summary already folds in the prior-session summary.
        let prior_summary = if has_running_summary {
            None
        } else {
            session.prior_summary()
        };
        let prompt = build_prompt(&PromptInputs {
            system: &request.system,
            history: &history_text,
            has_running_summary,
            prior_summary,
            user_name: user_name.as_deref(),
            user_input: &request.user_input,
        });

        let llm_request =
            LlmRequest::single_prompt(&request.model, prompt).with_temperature(request.temperature);
        let replies =
            ReplyStream::open(self.provider.as_ref(), &llm_request, self.reply_timeout).await?;

        Ok(PendingReply {
            replies,
            request,
            session,
        })
    }

    /// Persist a finished reply, append it as a turn, and rotate when due.
    ///
    /// Nothing here is fatal to the connection: storage and summarization
    /// failures are logged.
    #[instrument(skip(self, pending, answer), fields(user_id = %pending.request.user_id))]
    pub async fn complete_turn(&self, pending: PendingReply, answer: &str) -> TurnOutcome {
        let PendingReply {
            request,
            mut session,
            ..
        } = pending;

        if let Err(e) = self
            .store
            .append_history(&request.user_id, &request.user_input, answer)
        {
            warn!("failed to persist counsel history: {e}");
        }

        session.append_turn(request.user_input, answer);

        let rotated = match self.history.maybe_rotate(&mut session).await {
            Ok(rotated) => rotated,
            Err(e) => {
                warn!("rotation failed, keeping turns in memory: {e}");
                false
            }
        };

        TurnOutcome {
            turn_count: session.turn_count(),
            rotated,
        }
    }

    /// Release a connection's claim on `user_id`. The last release summarizes
    /// the remaining turns and looks for the user's name. Best effort.
    ///
    /// The session lock is held until both are done, so a reconnect for the
    /// same user waits and then continues from the flushed session.
    #[instrument(skip(self))]
    pub async fn detach(&self, user_id: &str) {
        let Some(session) = self.history.release(user_id) else {
            return;
        };
        let mut guard = session.lock().await;

        let transcript = guard.full_transcript();
        let settings = self.history.settings();
        let model = settings
            .summary_model
            .as_deref()
            .or(guard.last_model())
            .unwrap_or(settings.fallback_model.as_str())
            .to_string();

        if let Err(e) = self.history.flush(&mut guard).await {
            warn!("final summarization failed: {e}");
        }

        match self.identity.extract_name(&transcript, user_id, &model).await {
            Ok(outcome) => info!(?outcome, "session closed"),
            Err(e) => warn!("name extraction failed: {e}"),
        }

        if !self.history.evict_if_idle(user_id, &session) {
            debug!("user reconnected during flush, keeping session");
        }
    }
}
