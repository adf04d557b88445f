use std::sync::Arc;

use lyra_llm::{ChatModel, LlmProvider, ReplyEvent, ReplyStream, ReplyStreamHandle};

use crate::session::SessionManager;
use crate::transcript::{MessageId, Transcript};

/// Explicit gate for the single outstanding send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending,
}

/// In-flight reply bookkeeping held between submit and the terminal event.
struct ActiveReply {
    message_id: MessageId,
    stream: ReplyStream,
}

/// Embeddable chat widget core: transcript, session, and streaming glue.
///
/// One logical consumer drives the widget; `submit` opens a reply stream and
/// `pump` applies one event at a time, returning control to the host loop
/// between fragments. Must run inside a tokio runtime (reply workers are
/// spawned onto it).
pub struct ChatWidget {
    session: SessionManager,
    transcript: Transcript,
    model: ChatModel,
    send_state: SendState,
    active_reply: Option<ActiveReply>,
}

impl ChatWidget {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            session: SessionManager::new(provider),
            transcript: Transcript::new(),
            model: ChatModel::default(),
            send_state: SendState::Idle,
            active_reply: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn model(&self) -> ChatModel {
        self.model
    }

    pub fn send_state(&self) -> SendState {
        self.send_state
    }

    pub fn is_sending(&self) -> bool {
        self.send_state == SendState::Sending
    }

    /// Records the model choice; the session swap happens on the next submit.
    pub fn select_model(&mut self, model: ChatModel) {
        if self.model != model {
            tracing::debug!(model = model.remote_name(), "model selected");
        }
        self.model = model;
    }

    /// Starts a new chat: greeting-only transcript, no remote session.
    ///
    /// Dropping an in-flight stream signals cancellation to its worker.
    pub fn new_chat(&mut self) {
        self.active_reply = None;
        self.send_state = SendState::Idle;
        self.transcript.reset();
        self.session.reset();
        tracing::info!("started new chat");
    }

    /// Validates and submits one user turn, opening the reply stream.
    ///
    /// Whitespace-only input and submits while a reply is in flight are
    /// silent no-ops.
    pub fn submit(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        if self.send_state == SendState::Sending {
            tracing::debug!("submit ignored while a reply is in flight");
            return;
        }

        self.transcript.push_user(trimmed);
        let message_id = match self.transcript.begin_reply() {
            Ok(id) => id,
            Err(rejection) => {
                // A stray streaming placeholder means bookkeeping broke upstream.
                tracing::error!(%rejection, "could not begin reply");
                return;
            }
        };

        self.send_state = SendState::Sending;

        let handle = self
            .session
            .obtain(self.model)
            .and_then(|session| session.stream_reply(trimmed));

        match handle {
            Ok(ReplyStreamHandle { stream, worker }) => {
                tokio::spawn(worker);
                self.active_reply = Some(ActiveReply { message_id, stream });
            }
            Err(error) => {
                // Construction failures behave like a stream that failed
                // with zero fragments delivered.
                let _ = self.transcript.fail(message_id, &error.to_string());
                self.send_state = SendState::Idle;
            }
        }
    }

    /// Applies the next reply event; returns true while a reply is in flight.
    ///
    /// This is the single suspension point: between fragments, control goes
    /// back to the caller's event loop.
    pub async fn pump(&mut self) -> bool {
        let Some(active) = self.active_reply.as_mut() else {
            return false;
        };
        let message_id = active.message_id;

        match active.stream.recv().await {
            Some(ReplyEvent::Delta(fragment)) => {
                if self.transcript.append_fragment(message_id, &fragment).is_err() {
                    // The transcript no longer streams this message; drop it.
                    tracing::debug!(message_id = %message_id, "dropped stale fragment");
                }
                true
            }
            Some(ReplyEvent::Done) => {
                let _ = self.transcript.settle(message_id);
                self.finish_reply();
                false
            }
            Some(ReplyEvent::Error(error)) => {
                let _ = self.transcript.fail(message_id, &error);
                self.finish_reply();
                false
            }
            None => {
                // Worker went away without a terminal event.
                let _ = self
                    .transcript
                    .fail(message_id, "reply stream ended before a terminal event");
                self.finish_reply();
                false
            }
        }
    }

    /// Submits one user turn and drives the reply to completion.
    pub async fn send(&mut self, text: &str) {
        self.submit(text);
        while self.pump().await {}
    }

    fn finish_reply(&mut self) {
        self.active_reply = None;
        self.send_state = SendState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use lyra_llm::{
        ChatSession, LlmProvider, ProviderError, ProviderResult, ReplyEvent, ReplyStreamHandle,
        ReplyWorker, reply_channel,
    };

    use crate::transcript::{APOLOGY_MESSAGE, MessageStatus, Role, WELCOME_MESSAGE};

    use super::*;

    /// One scripted outcome for a single `stream_reply` call.
    #[derive(Debug, Clone)]
    enum ReplyScript {
        /// Emit the fragments, then complete normally.
        Reply(Vec<&'static str>),
        /// Emit the fragments, then fail mid-stream.
        FailAfter(Vec<&'static str>),
        /// Refuse to open the stream at all.
        FailToOpen,
    }

    struct ScriptedProvider {
        scripts: Arc<Mutex<VecDeque<ReplyScript>>>,
        opened: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<ReplyScript>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Arc::new(Mutex::new(scripts.into())),
                opened: AtomicUsize::new(0),
            })
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        fn remaining(&self) -> usize {
            self.scripts.lock().unwrap().len()
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn open_session(
            &self,
            model: ChatModel,
            _system_instruction: &str,
        ) -> ProviderResult<Arc<dyn ChatSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedSession {
                model,
                scripts: Arc::clone(&self.scripts),
            }))
        }
    }

    struct ScriptedSession {
        model: ChatModel,
        scripts: Arc<Mutex<VecDeque<ReplyScript>>>,
    }

    impl ChatSession for ScriptedSession {
        fn model(&self) -> ChatModel {
            self.model
        }

        fn stream_reply(&self, _user_text: &str) -> ProviderResult<ReplyStreamHandle> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ReplyScript::Reply(Vec::new()));

            if matches!(script, ReplyScript::FailToOpen) {
                return Err(ProviderError::MissingApiKey {
                    stage: "scripted-open",
                    variable: "GEMINI_API_KEY",
                });
            }

            let (event_tx, stream, _cancel_rx) = reply_channel();
            let worker: ReplyWorker = Box::pin(async move {
                match script {
                    ReplyScript::Reply(fragments) => {
                        for fragment in fragments {
                            let _ = event_tx.send(ReplyEvent::Delta(fragment.to_string()));
                        }
                        let _ = event_tx.send(ReplyEvent::Done);
                    }
                    ReplyScript::FailAfter(fragments) => {
                        for fragment in fragments {
                            let _ = event_tx.send(ReplyEvent::Delta(fragment.to_string()));
                        }
                        let _ = event_tx.send(ReplyEvent::Error("scripted failure".to_string()));
                    }
                    ReplyScript::FailToOpen => unreachable!(),
                }
            });

            Ok(ReplyStreamHandle { stream, worker })
        }
    }

    #[tokio::test]
    async fn reply_fragments_settle_in_order() {
        let provider = ScriptedProvider::new(vec![ReplyScript::Reply(vec!["Hi", " there", "!"])]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("Hello").await;

        let last = widget.transcript().last().unwrap();
        assert_eq!(last.role, Role::Model);
        assert_eq!(last.text, "Hi there!");
        assert_eq!(last.status, MessageStatus::Settled);
        assert!(!widget.is_sending());
    }

    #[tokio::test]
    async fn zero_fragment_failure_leaves_the_apology() {
        let provider = ScriptedProvider::new(vec![ReplyScript::FailAfter(Vec::new())]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("test").await;

        let messages = widget.transcript().messages();
        // Greeting + user + apology; no empty placeholder remains.
        assert_eq!(messages.len(), 3);
        let last = messages.last().unwrap();
        assert_eq!(last.text, APOLOGY_MESSAGE);
        assert_eq!(last.status, MessageStatus::Settled);
    }

    #[tokio::test]
    async fn partial_failure_keeps_the_partial_text() {
        let provider = ScriptedProvider::new(vec![ReplyScript::FailAfter(vec!["Partial"])]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("test2").await;

        let last = widget.transcript().last().unwrap();
        assert_eq!(last.text, "Partial");
        assert_eq!(last.status, MessageStatus::Settled);
        assert_eq!(widget.transcript().len(), 3);
    }

    #[tokio::test]
    async fn session_open_failure_behaves_like_zero_fragments() {
        let provider = ScriptedProvider::new(vec![ReplyScript::FailToOpen]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("hello?").await;

        let last = widget.transcript().last().unwrap();
        assert_eq!(last.text, APOLOGY_MESSAGE);
        assert!(!widget.is_sending());
    }

    #[tokio::test]
    async fn submitting_while_busy_is_a_no_op() {
        let provider = ScriptedProvider::new(vec![ReplyScript::Reply(vec!["Hi"])]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.submit("first");
        assert!(widget.is_sending());
        let len_before = widget.transcript().len();

        widget.submit("second");

        assert_eq!(widget.transcript().len(), len_before);
        assert_eq!(provider.opened(), 1);
        assert_eq!(provider.remaining(), 0);

        while widget.pump().await {}
        assert_eq!(widget.transcript().last().unwrap().text, "Hi");
    }

    #[tokio::test]
    async fn whitespace_input_is_inert() {
        let provider = ScriptedProvider::new(Vec::new());
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("").await;
        widget.send("   \n\t").await;

        assert_eq!(widget.transcript().len(), 1);
        assert_eq!(provider.opened(), 0);
        assert!(!widget.is_sending());
    }

    #[tokio::test]
    async fn model_switch_discards_the_session() {
        let provider = ScriptedProvider::new(vec![
            ReplyScript::Reply(vec!["a"]),
            ReplyScript::Reply(vec!["b"]),
            ReplyScript::Reply(vec!["c"]),
        ]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("one").await;
        widget.select_model(ChatModel::Pro);
        widget.send("two").await;
        // Reverting still opens a fresh session.
        widget.select_model(ChatModel::Flash);
        widget.send("three").await;

        assert_eq!(provider.opened(), 3);
    }

    #[tokio::test]
    async fn new_chat_resets_transcript_and_session() {
        let provider = ScriptedProvider::new(vec![
            ReplyScript::Reply(vec!["first"]),
            ReplyScript::Reply(vec!["second"]),
        ]);
        let mut widget = ChatWidget::new(provider.clone());

        widget.send("one").await;
        widget.new_chat();

        let messages = widget.transcript().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, WELCOME_MESSAGE);
        assert_eq!(messages[0].status, MessageStatus::Settled);

        widget.send("two").await;
        assert_eq!(provider.opened(), 2);
        assert_eq!(widget.transcript().last().unwrap().text, "second");
    }
}
