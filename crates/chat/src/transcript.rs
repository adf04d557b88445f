use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use uuid::Uuid;

/// Greeting shown as the only entry of every fresh transcript.
pub const WELCOME_MESSAGE: &str =
    "Hello! I'm your AI assistant. How can I help you with your text today?";

/// Fixed user-facing text shown when a reply fails before producing output.
pub const APOLOGY_MESSAGE: &str =
    "Sorry, I encountered an error processing your request. Please try again.";

/// Stable identifier for one transcript message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Transcript speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Model,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Text is still being filled by an active reply stream.
    Streaming,
    /// Text is final and will never be mutated again.
    Settled,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new_v4(),
            role,
            text: text.into(),
            status,
            created_at: Utc::now(),
        }
    }

    /// Creates a message whose text is already final.
    pub fn settled(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, text, MessageStatus::Settled)
    }

    /// Creates the empty model placeholder filled by an active stream.
    pub fn streaming_placeholder() -> Self {
        Self::new(Role::Model, String::new(), MessageStatus::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// Rejection reason for illegal transcript mutations.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum TranscriptRejection {
    #[snafu(display("message '{id}' is not in the transcript"))]
    UnknownMessage { id: MessageId },
    #[snafu(display("message '{id}' is settled and can no longer change"))]
    MessageSettled { id: MessageId },
    #[snafu(display("a streaming message '{id}' is already active"))]
    AlreadyStreaming { id: MessageId },
}

pub type TranscriptResult<T> = Result<T, TranscriptRejection>;

/// Ordered chat transcript.
///
/// Append-only, apart from the in-place text/status mutation of the single
/// streaming model message. Once a message settles, its text is frozen and
/// further fragment application is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Creates a transcript holding only the fixed greeting.
    pub fn new() -> Self {
        Self {
            messages: vec![Message::settled(Role::Model, WELCOME_MESSAGE)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the id of the active streaming message, if any.
    pub fn streaming_id(&self) -> Option<MessageId> {
        self.messages
            .iter()
            .find(|message| message.is_streaming())
            .map(|message| message.id)
    }

    /// Appends a settled user message.
    pub fn push_user(&mut self, text: impl Into<String>) -> MessageId {
        let message = Message::settled(Role::User, text);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Appends the empty streaming placeholder for the next model reply.
    ///
    /// At most one streaming message can exist at a time.
    pub fn begin_reply(&mut self) -> TranscriptResult<MessageId> {
        if let Some(id) = self.streaming_id() {
            return Err(TranscriptRejection::AlreadyStreaming { id });
        }

        let message = Message::streaming_placeholder();
        let id = message.id;
        self.messages.push(message);
        Ok(id)
    }

    /// Concatenates one fragment onto the streaming message's text.
    pub fn append_fragment(&mut self, id: MessageId, fragment: &str) -> TranscriptResult<()> {
        let message = self.find_mut(id)?;
        if !message.is_streaming() {
            return Err(TranscriptRejection::MessageSettled { id });
        }

        message.text.push_str(fragment);
        Ok(())
    }

    /// Freezes the streaming message; its text is final from here on.
    pub fn settle(&mut self, id: MessageId) -> TranscriptResult<()> {
        let message = self.find_mut(id)?;
        if !message.is_streaming() {
            return Err(TranscriptRejection::MessageSettled { id });
        }

        message.status = MessageStatus::Settled;
        Ok(())
    }

    /// Applies the failure policy to the streaming message.
    ///
    /// A still-empty placeholder is removed and replaced by the fixed
    /// apology; partial text is kept and settled with the error reported
    /// only to the log.
    pub fn fail(&mut self, id: MessageId, error: &str) -> TranscriptResult<()> {
        let index = self
            .messages
            .iter()
            .position(|message| message.id == id)
            .ok_or(TranscriptRejection::UnknownMessage { id })?;

        if !self.messages[index].is_streaming() {
            return Err(TranscriptRejection::MessageSettled { id });
        }

        if self.messages[index].text.is_empty() {
            self.messages.remove(index);
            self.messages
                .push(Message::settled(Role::Model, APOLOGY_MESSAGE));
            tracing::error!(error, "reply failed before any output; apologizing");
        } else {
            let message = &mut self.messages[index];
            message.status = MessageStatus::Settled;
            tracing::warn!(
                error,
                kept_chars = message.text.len(),
                "reply failed mid-stream; keeping partial output"
            );
        }

        Ok(())
    }

    /// Clears back to the single greeting message.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn find_mut(&mut self, id: MessageId) -> TranscriptResult<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or(TranscriptRejection::UnknownMessage { id })
    }
}
