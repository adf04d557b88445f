mod gemini;
mod model;
mod provider;

pub use gemini::{GEMINI_PROVIDER_ID, GeminiProvider, GeminiSession};
pub use model::{ChatModel, MODEL_CATALOG};
pub use provider::{
    ChatSession, GEMINI_API_KEY_VAR, GEMINI_BASE_URL_VAR, LlmProvider, ProviderConfig,
    ProviderError, ProviderResult, ReplyEvent, ReplyStream, ReplyStreamHandle, ReplyWorker,
    reply_channel,
};
