pub mod history;
pub mod identity;
pub mod openai;
pub mod prompt;
pub mod providers;
pub mod runtime;
pub mod stream;

pub use history::{HistoryManager, HistorySettings, Turn, UserSession};
pub use identity::{IdentityResolver, NameOutcome};
pub use openai::OpenAiProvider;
pub use prompt::{PromptInputs, build_prompt};
pub use providers::{
    ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamResponse,
    Usage,
};
pub use runtime::{CounselRuntime, PendingReply, RuntimeSettings, TurnOutcome};
pub use stream::{ReplyEvent, ReplyStream};
