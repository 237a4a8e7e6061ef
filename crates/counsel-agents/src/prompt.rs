//! Prompt templates for counseling replies, rolling summaries and name discovery.

/// Everything the reply template needs for one request.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    /// Persona supplied by the client (`system` field).
    pub system: &'a str,
    /// Output of `UserSession::build_history_text`.
    pub history: &'a str,
    /// Whether `history` starts from a running summary of this session.
    pub has_running_summary: bool,
    /// Latest stored summary from an earlier session, if the user is returning.
    pub prior_summary: Option<&'a str>,
    /// Discovered name, never the sentinel.
    pub user_name: Option<&'a str>,
    pub user_input: &'a str,
}

const EMPTY_HISTORY: &str = "(이전 대화 없음)";

const CONTINUE_WITHOUT_GREETING: &str =
    "이미 진행 중인 상담입니다. 다시 인사하지 말고 위 요약과 대화에 이어서 자연스럽게 답하세요.";

const ASK_WHAT_CHANGED: &str = "이 내담자는 이전에 상담을 받은 적이 있습니다. \
     이번 상담의 첫 응답이라면 지난 상담 이후 어떤 변화가 있었는지 먼저 물어보세요.";

/// Build the single prompt string sent to the model.
///
/// First-time users get persona, history and message. Returning users also
/// get the prior-session summary and an instruction to ask what changed.
pub fn build_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(inputs.system.trim());
    prompt.push_str("\n\n");

    if let Some(name) = inputs.user_name {
        prompt.push_str(&format!("내담자의 이름은 {name}입니다. 필요할 때 이름을 불러 주세요.\n\n"));
    }

    if let Some(prior) = inputs.prior_summary.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("지난 상담 요약 :\n");
        prompt.push_str(prior.trim());
        prompt.push_str("\n\n");
        prompt.push_str(ASK_WHAT_CHANGED);
        prompt.push_str("\n\n");
    }

    prompt.push_str("이전 대화 :\n");
    if inputs.history.trim().is_empty() {
        prompt.push_str(EMPTY_HISTORY);
    } else {
        prompt.push_str(inputs.history.trim_end());
    }
    prompt.push_str("\n\n");

    if inputs.has_running_summary {
        prompt.push_str(CONTINUE_WITHOUT_GREETING);
        prompt.push_str("\n\n");
    }

    prompt.push_str("사용자 메세지 :\n");
    prompt.push_str(inputs.user_input);
    prompt
}

pub const SUMMARY_SYSTEM_PROMPT: &str = "당신은 심리상담 기록을 정리하는 요약가입니다.";

/// Ask the model to fold a transcript into the previous summary.
///
/// Small talk is passed through unchanged instead of being compressed.
pub fn build_summary_prompt(previous_summary: Option<&str>, transcript: &str) -> String {
    let previous = previous_summary
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(없음)");

    format!(
        "아래의 이전 요약과 새 대화를 합쳐 하나의 상담 요약으로 정리하세요.\n\
         내담자의 고민, 감정 상태, 중요한 사실, 상담가가 제안한 내용을 보존하고 간결하게 쓰세요.\n\
         새 대화가 인사나 가벼운 잡담뿐이라면 요약하지 말고 입력 내용을 그대로 출력하세요.\n\
         요약문만 출력하세요.\n\n\
         이전 요약 :\n{previous}\n\n\
         새 대화 :\n{transcript}"
    )
}

/// Ask the model for the user's bare name, or the sentinel.
pub fn build_name_prompt(history_text: &str, sentinel: &str) -> String {
    format!(
        "다음 상담 대화에서 내담자(사용자)가 스스로 밝힌 이름을 찾으세요.\n\
         규칙:\n\
         - 이름만 출력하세요. 존칭, 설명, 문장부호를 붙이지 마세요.\n\
         - 이름이 나오지 않았다면 정확히 {sentinel} 만 출력하세요.\n\n\
         대화 :\n{history_text}"
    )
}
