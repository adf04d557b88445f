use std::sync::Arc;

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::ChatModel;
use crate::provider::{
    ChatSession, CompletionsFailedSnafu, EmptyPromptSnafu, GEMINI_API_KEY_VAR, HttpClientSnafu,
    LlmProvider, MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderResult, ReplyEvent,
    ReplyStreamHandle, ReplyWorker, reply_channel,
};

pub const GEMINI_PROVIDER_ID: &str = "gemini";

type GeminiCompletionModel = gemini::completion::CompletionModel;
type GeminiStreamingResponse = rig::streaming::StreamingCompletionResponse<
    <GeminiCompletionModel as CompletionModel>::StreamingResponse,
>;

/// One committed user/model exchange replayed as context on later turns.
#[derive(Debug, Clone)]
struct HistoryTurn {
    user: String,
    reply: String,
}

/// Gemini-backed completion provider.
pub struct GeminiProvider {
    config: ProviderConfig,
}

impl GeminiProvider {
    /// Validates the credential synchronously; no network IO happens here.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-provider-new",
                variable: GEMINI_API_KEY_VAR,
            }
        );

        Ok(Self { config })
    }

    /// Builds a provider from the process environment.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        if !config.base_url.is_empty() {
            builder = builder.base_url(config.base_url.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }
}

impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        GEMINI_PROVIDER_ID
    }

    fn open_session(
        &self,
        model: ChatModel,
        system_instruction: &str,
    ) -> ProviderResult<Arc<dyn ChatSession>> {
        // Client construction is the synchronous part of opening a session;
        // the first network call happens inside the stream worker.
        Self::build_client(&self.config)?;

        tracing::info!(model = model.remote_name(), "opened gemini session");

        Ok(Arc::new(GeminiSession {
            config: self.config.clone(),
            model,
            system_instruction: system_instruction.to_string(),
            history: Arc::new(RwLock::new(Vec::new())),
        }))
    }
}

/// One remote conversational context.
///
/// The hosted API is stateless HTTP, so the handle carries the context
/// itself: completed turns are replayed as chat history on every request.
/// A failed turn is never committed.
pub struct GeminiSession {
    config: ProviderConfig,
    model: ChatModel,
    system_instruction: String,
    history: Arc<RwLock<Vec<HistoryTurn>>>,
}

impl GeminiSession {
    async fn open_stream(
        config: &ProviderConfig,
        model: ChatModel,
        system_instruction: &str,
        history: &[HistoryTurn],
        user_text: &str,
    ) -> ProviderResult<GeminiStreamingResponse> {
        let client = GeminiProvider::build_client(config)?;
        let completion_model = client.completion_model(model.remote_name());

        let mut messages = Vec::with_capacity(history.len() * 2);
        for turn in history {
            messages.push(RigMessage::user(turn.user.clone()));
            messages.push(RigMessage::assistant(turn.reply.clone()));
        }

        let prompt = RigMessage::user(user_text.to_string());
        let mut builder = completion_model.completion_request(prompt).messages(messages);

        if !system_instruction.trim().is_empty() {
            builder = builder.preamble(system_instruction.to_string());
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(text.text),
            // Only text reaches the transcript; reasoning and tool traffic
            // stay provider-side.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        model: ChatModel,
        system_instruction: String,
        user_text: String,
        history: Arc<RwLock<Vec<HistoryTurn>>>,
        event_tx: mpsc::UnboundedSender<ReplyEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let snapshot = history.read().await.clone();
        let mut stream = match Self::open_stream(
            &config,
            model,
            &system_instruction,
            &snapshot,
            &user_text,
        )
        .await
        {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    model = model.remote_name(),
                    error = %error,
                    "failed to open reply stream"
                );
                let _ = event_tx.send(ReplyEvent::Error(error.to_string()));
                return;
            }
        };

        let mut reply = String::new();
        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    // Cancel the upstream stream so provider IO stops promptly.
                    tracing::debug!(model = model.remote_name(), "reply stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(delta) = Self::map_stream_item(item) {
                                reply.push_str(&delta);
                                if event_tx.send(ReplyEvent::Delta(delta)).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                model = model.remote_name(),
                                error = %source,
                                "reply stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            let _ = event_tx.send(ReplyEvent::Error(error.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if cancelled || stream_failed {
            return;
        }

        // Commit the exchange so follow-up turns carry the context.
        history.write().await.push(HistoryTurn {
            user: user_text,
            reply,
        });

        let _ = event_tx.send(ReplyEvent::Done);
    }
}

impl ChatSession for GeminiSession {
    fn model(&self) -> ChatModel {
        self.model
    }

    fn stream_reply(&self, user_text: &str) -> ProviderResult<ReplyStreamHandle> {
        ensure!(
            !user_text.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "stream-reply",
            }
        );

        let (event_tx, stream, cancel_rx) = reply_channel();
        let worker: ReplyWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            self.model,
            self.system_instruction.clone(),
            user_text.to_string(),
            Arc::clone(&self.history),
            event_tx,
            cancel_rx,
        ));

        Ok(ReplyStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        assert!(matches!(
            GeminiProvider::new(ProviderConfig::new("", "")),
            Err(ProviderError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn maps_only_text_items_to_deltas() {
        let text_item = StreamedAssistantContent::<()>::Text(rig::message::Text {
            text: "chunk".to_string(),
        });
        assert_eq!(
            GeminiSession::map_stream_item(text_item),
            Some("chunk".to_string())
        );
    }
}
