use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use crate::model::ChatModel;

/// Environment variable holding the remote credential.
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Optional environment variable overriding the remote endpoint.
pub const GEMINI_BASE_URL_VAR: &str = "GEMINI_BASE_URL";

/// Connection settings for the hosted completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: base_url.into().trim().to_string(),
        }
    }

    /// Reads connection settings from the process environment.
    ///
    /// A missing or empty credential is a construction-time error; nothing
    /// at this layer recovers from it.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var(GEMINI_API_KEY_VAR)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let Some(api_key) = api_key else {
            return MissingApiKeySnafu {
                stage: "config-from-env",
                variable: GEMINI_API_KEY_VAR,
            }
            .fail();
        };

        let base_url = std::env::var(GEMINI_BASE_URL_VAR).unwrap_or_default();

        Ok(Self::new(api_key, base_url))
    }
}

pub type ReplyWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key: environment variable '{variable}' is unset or empty"))]
    MissingApiKey {
        stage: &'static str,
        variable: &'static str,
    },
    #[snafu(display("reply request on `{stage}` has an empty prompt"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// One incremental event from a reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// One text fragment, delivered in arrival order. Fragments may split
    /// mid-word; only their in-order concatenation is meaningful.
    Delta(String),
    /// The remote stream finished normally.
    Done,
    /// The remote call failed. Fragments already delivered stay delivered.
    Error(String),
}

/// Pull-based consumer side of one reply stream.
///
/// Single-pass and non-restartable: once `recv` returns a terminal event or
/// `None`, the stream is exhausted. Dropping the stream signals cancellation
/// to the worker; no widget operation exposes that as a user-facing stop.
pub struct ReplyStream {
    events: mpsc::UnboundedReceiver<ReplyEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl ReplyStream {
    fn new(events: mpsc::UnboundedReceiver<ReplyEvent>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Awaits the next event; `None` means the worker went away.
    pub async fn recv(&mut self) -> Option<ReplyEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant for hosts that poll.
    pub fn try_recv(&mut self) -> Option<ReplyEvent> {
        self.events.try_recv().ok()
    }

    /// Signals the worker to stop. Returns false if already signalled.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Pairs a reply stream with the worker future that feeds it.
///
/// The worker must be spawned (or otherwise polled) by the consumer; the
/// stream yields nothing until it runs.
pub struct ReplyStreamHandle {
    pub stream: ReplyStream,
    pub worker: ReplyWorker,
}

/// Builds the channel trio backing one reply stream.
///
/// Public so adapters and test doubles alike can assemble handles.
pub fn reply_channel() -> (
    mpsc::UnboundedSender<ReplyEvent>,
    ReplyStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (event_tx, ReplyStream::new(event_rx, cancel_tx), cancel_rx)
}

/// One remote conversational context bound to a single model.
///
/// Switching models never mutates a session; the caller opens a fresh one
/// and drops this handle, so no history leaks across models.
pub trait ChatSession: Send + Sync {
    fn model(&self) -> ChatModel;

    /// Submits one user turn and returns the lazy reply stream.
    ///
    /// Failures before the first fragment and mid-stream failures both
    /// surface as a single [`ReplyEvent::Error`] at the point of failure.
    fn stream_reply(&self, user_text: &str) -> ProviderResult<ReplyStreamHandle>;
}

/// Factory boundary for the hosted completion service.
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Opens a fresh remote session scoped to `model`.
    ///
    /// Construction failures propagate synchronously; no retry is attempted
    /// at this layer.
    fn open_session(
        &self,
        model: ChatModel,
        system_instruction: &str,
    ) -> ProviderResult<Arc<dyn ChatSession>>;
}
