pub mod session;
pub mod transcript;
pub mod widget;

pub use lyra_llm::{
    ChatModel, ChatSession, GeminiProvider, LlmProvider, MODEL_CATALOG, ProviderConfig,
    ProviderError, ProviderResult, ReplyEvent, ReplyStream, ReplyStreamHandle,
};
pub use session::{SYSTEM_INSTRUCTION, SessionManager};
pub use transcript::{
    APOLOGY_MESSAGE, Message, MessageId, MessageStatus, Role, Transcript, TranscriptRejection,
    WELCOME_MESSAGE,
};
pub use widget::{ChatWidget, SendState};
