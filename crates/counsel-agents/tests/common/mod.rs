#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use counsel_agents::{
    CounselRuntime, LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamResponse,
    ReplyEvent, RuntimeSettings, TurnOutcome,
};
use counsel_common::{CounselRequest, Error, Result};
use counsel_db::CounselStore;
use futures::StreamExt;

/// In-process provider with canned replies.
///
/// Requests carrying a system prompt are summarization calls; the rest of
/// the non-streaming calls are name extraction.
pub struct ScriptedProvider {
    pub fragments: Vec<String>,
    pub fragment_delay: Duration,
    pub summary: String,
    pub summary_delay: Duration,
    pub name: String,
    pub fail_complete: bool,
    pub stream_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    pub name_calls: AtomicUsize,
    pub stream_prompts: Mutex<Vec<String>>,
    pub summary_prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            fragments: vec!["반갑습니다. ".to_string(), "오늘 기분은 어떠세요?".to_string()],
            fragment_delay: Duration::ZERO,
            summary: "내담자는 최근 직장 스트레스로 잠을 잘 못 잔다고 이야기했다.".to_string(),
            summary_delay: Duration::ZERO,
            name: "unknown".to_string(),
            fail_complete: false,
            stream_calls: AtomicUsize::new(0),
            summary_calls: AtomicUsize::new(0),
            name_calls: AtomicUsize::new(0),
            stream_prompts: Mutex::new(Vec::new()),
            summary_prompts: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedProvider {
    pub fn last_stream_prompt(&self) -> String {
        self.stream_prompts
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

fn prompt_text(request: &LlmRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if self.fail_complete {
            return Err(Error::Agent("provider unavailable".to_string()));
        }

        let text = if request.system.is_some() {
            if !self.summary_delay.is_zero() {
                tokio::time::sleep(self.summary_delay).await;
            }
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            self.summary_prompts.lock().unwrap().push(prompt_text(request));
            self.summary.clone()
        } else {
            self.name_calls.fetch_add(1, Ordering::SeqCst);
            self.name.clone()
        };

        Ok(LlmResponse {
            text,
            model: request.model.clone(),
            usage: None,
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_prompts.lock().unwrap().push(prompt_text(request));

        let delay = self.fragment_delay;
        let items: Vec<Result<LlmStreamResponse>> = self
            .fragments
            .iter()
            .map(|f| {
                Ok(LlmStreamResponse {
                    delta: f.clone(),
                    usage: None,
                    stop_reason: None,
                })
            })
            .collect();

        Ok(Box::pin(futures::stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        })))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

pub fn runtime_with(provider: Arc<ScriptedProvider>) -> (CounselRuntime, Arc<CounselStore>) {
    let store = Arc::new(CounselStore::in_memory().expect("in-memory store should open"));
    let runtime = CounselRuntime::new(provider, store.clone(), RuntimeSettings::default());
    (runtime, store)
}

pub fn request(user_id: &str, user_input: &str) -> CounselRequest {
    CounselRequest {
        model: "gpt-4o".to_string(),
        temperature: 0.3,
        system: "당신은 친절하고 공감하는 심리상담가입니다.".to_string(),
        user_input: user_input.to_string(),
        user_id: user_id.to_string(),
    }
}

/// Drive one request to completion and return the relayed fragments, the
/// final text and the turn outcome.
pub async fn run_turn(
    runtime: &CounselRuntime,
    user_id: &str,
    user_input: &str,
) -> (Vec<String>, String, TurnOutcome) {
    let mut pending = runtime
        .begin_turn(request(user_id, user_input))
        .await
        .expect("turn should start");

    let mut fragments = Vec::new();
    let mut answer = None;
    while let Some(event) = pending.replies.next().await {
        match event.expect("stream should not fail") {
            ReplyEvent::Fragment(text) => fragments.push(text),
            ReplyEvent::Finished(text) => answer = Some(text),
        }
    }

    let answer = answer.expect("stream should finish with the full text");
    let outcome = runtime.complete_turn(pending, &answer).await;
    (fragments, answer, outcome)
}
