use std::sync::Arc;

use counsel_common::{Error, Result};
use counsel_db::{CounselStore, UNKNOWN_USER_NAME};
use tracing::{debug, info};

use crate::prompt::build_name_prompt;
use crate::providers::{LlmProvider, LlmRequest};

/// Longest answer still accepted as a bare name.
const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOutcome {
    /// A real name was already stored; the model was not asked.
    AlreadyKnown(String),
    /// The model found a name and it was stored.
    Discovered(String),
    /// No name in the dialogue; the sentinel was stored.
    NotFound,
    /// Nothing to look at.
    Skipped,
}

/// Looks up users and discovers their names from dialogue.
pub struct IdentityResolver {
    provider: Arc<dyn LlmProvider>,
    store: Arc<CounselStore>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn LlmProvider>, store: Arc<CounselStore>) -> Self {
        Self { provider, store }
    }

    /// Create the user record if absent. Returns `true` for a new user.
    pub fn ensure_user(&self, user_id: &str) -> Result<bool> {
        self.store.ensure_user(user_id)
    }

    /// The stored name, if it is a real one.
    pub fn known_name(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get_user(user_id)?
            .and_then(|user| user.known_name().map(str::to_string)))
    }

    /// Ask the model for the user's name and store the answer.
    ///
    /// Only runs while the stored name is unset or the sentinel, so a
    /// discovered name is never replaced by the sentinel.
    pub async fn extract_name(
        &self,
        history_text: &str,
        user_id: &str,
        model: &str,
    ) -> Result<NameOutcome> {
        if let Some(name) = self.known_name(user_id)? {
            debug!(user_id, "name already known, skipping extraction");
            return Ok(NameOutcome::AlreadyKnown(name));
        }
        if history_text.trim().is_empty() {
            return Ok(NameOutcome::Skipped);
        }

        let request =
            LlmRequest::single_prompt(model, build_name_prompt(history_text, UNKNOWN_USER_NAME))
                .with_temperature(0.0);
        let response = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| Error::Agent(format!("name extraction failed: {e}")))?;

        match normalize_name(&response.text) {
            Some(name) => {
                self.store.set_user_name(user_id, &name)?;
                info!(user_id, "discovered user name");
                Ok(NameOutcome::Discovered(name))
            }
            None => {
                self.store.set_user_name(user_id, UNKNOWN_USER_NAME)?;
                Ok(NameOutcome::NotFound)
            }
        }
    }
}

/// Reduce a model answer to a bare name, or `None` for the sentinel and
/// anything that does not look like a name.
fn normalize_name(raw: &str) -> Option<String> {
    let first_line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let name = first_line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '.' | '。' | '!' | ','))
        .trim();

    if name.is_empty()
        || name.eq_ignore_ascii_case(UNKNOWN_USER_NAME)
        || name.chars().count() > MAX_NAME_CHARS
        || name.split_whitespace().count() > 3
    {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_and_quoted_names() {
        assert_eq!(normalize_name("지원"), Some("지원".to_string()));
        assert_eq!(normalize_name("  \"Jiwon\".\n"), Some("Jiwon".to_string()));
        assert_eq!(normalize_name("\n\n민수"), Some("민수".to_string()));
    }

    #[test]
    fn sentinel_and_sentences_are_rejected() {
        assert_eq!(normalize_name("unknown"), None);
        assert_eq!(normalize_name("UNKNOWN"), None);
        assert_eq!(normalize_name(""), None);
        assert_eq!(
            normalize_name("대화에서 사용자의 이름은 언급되지 않았습니다 그래서 알 수 없습니다"),
            None
        );
    }
}
