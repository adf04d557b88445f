use std::sync::Arc;

use lyra_llm::{ChatModel, ChatSession, LlmProvider, ProviderResult};

/// Fixed system instruction attached to every remote session.
pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful, clear, and precise AI assistant. Format your responses with Markdown.";

struct ActiveSession {
    model: ChatModel,
    handle: Arc<dyn ChatSession>,
}

/// Owns the one active remote session and its model binding.
///
/// The session is opened lazily on first use and replaced whenever the
/// requested model differs from the active one. A displaced handle is
/// dropped, never reused, so a model switch always starts from a fresh
/// remote context with no carried history.
pub struct SessionManager {
    provider: Arc<dyn LlmProvider>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            active: None,
        }
    }

    /// Model bound to the active session, if one exists.
    pub fn active_model(&self) -> Option<ChatModel> {
        self.active.as_ref().map(|active| active.model)
    }

    /// Returns a session for `model`, reusing the active one when it matches.
    ///
    /// Construction failures propagate to the caller unchanged; no retry is
    /// attempted here.
    pub fn obtain(&mut self, model: ChatModel) -> ProviderResult<Arc<dyn ChatSession>> {
        if let Some(active) = &self.active {
            if active.model == model {
                return Ok(Arc::clone(&active.handle));
            }

            tracing::info!(
                from = active.model.remote_name(),
                to = model.remote_name(),
                "model changed; discarding active session"
            );
        }

        let handle = self
            .provider
            .open_session(model, SYSTEM_INSTRUCTION)?;
        self.active = Some(ActiveSession {
            model,
            handle: Arc::clone(&handle),
        });

        Ok(handle)
    }

    /// Drops the active session unconditionally.
    ///
    /// Only the local reference is released; any remote-side cleanup is the
    /// remote service's responsibility.
    pub fn reset(&mut self) {
        if self.active.take().is_some() {
            tracing::debug!("session reset");
        }
    }
}
