//! Conversation types and state management
//!
//! A [`Conversation`] holds the in-memory transcript for one category and
//! drives a turn: it appends the user message and an assistant placeholder,
//! opens the event stream through a [`ChatTransport`], and folds every
//! [`StreamEvent`] into the placeholder in wire order.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{ChatTransport, TransportError, TurnRequest};
use crate::sse::StreamEvent;

/// Substring the upstream uses when a conversation id is no longer valid
pub const SESSION_EXPIRED_PHRASE: &str = "Conversation Not Exists";

/// Message sent by the opener's begin affordance
pub const BEGIN_SENTINEL: &str = "begin";

/// Placeholder text after a failed turn
pub const FAILURE_NOTICE: &str = "An error occurred. Please try again.";

/// User-facing notice after the upstream session was dropped
pub const SESSION_RESET_NOTICE: &str =
    "Your conversation session expired and was reset. Please send your message again.";

const OPENER_ID: &str = "opener";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Topic category, sent upstream as the `select` input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Chapter,
    Education,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::General, Category::Chapter, Category::Education];

    pub fn wire_value(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Chapter => "chapter",
            Category::Education => "education",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::General => "General",
            Category::Chapter => "Chapter-specific",
            Category::Education => "Education",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::General => "Ask about the general rules and policies",
            Category::Chapter => "Ask about rules specific to your chapter",
            Category::Education => "Get help preparing educational content",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.wire_value().eq_ignore_ascii_case(value.trim()))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Part of the in-flight turn
    pub is_streaming: bool,
    /// No fragment received yet
    pub is_loading: bool,
    pub is_opener: bool,
}

impl ChatMessage {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            is_streaming: false,
            is_loading: false,
            is_opener: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            is_streaming: true,
            is_loading: true,
            ..Self::new(Role::Assistant, "")
        }
    }

    pub fn opener(category: Category) -> Self {
        Self {
            id: OPENER_ID.to_string(),
            is_opener: true,
            ..Self::new(
                Role::Assistant,
                format!(
                    "Hello! I'm here to answer your questions.\n\n\
                     Current category: {}.\n\
                     Ask me anything about the rules, policies or running your chapter.",
                    category.label()
                ),
            )
        }
    }
}

/// Which screen the client is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    CategorySelect,
    Chat,
}

/// Why a turn failed
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `error` event reported by the upstream mid-stream
    #[error("{0}")]
    Stream(String),

    #[error("{0}")]
    SessionExpired(String),
}

impl TurnError {
    /// Reclassify failures whose text says the upstream conversation is gone
    pub fn classify(self) -> Self {
        match self {
            TurnError::SessionExpired(_) => self,
            other => {
                let text = other.to_string();
                if text.contains(SESSION_EXPIRED_PHRASE) {
                    TurnError::SessionExpired(text)
                } else {
                    other
                }
            }
        }
    }
}

/// Handle for the turn currently in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub query: String,
    pub assistant_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    category: Category,
    conversation_id: String,
    is_loading: bool,
    last_error: Option<String>,
    screen: Screen,
    user: Option<String>,
}

impl Conversation {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            ..Self::default()
        }
    }

    /// Use a stable user identifier for every turn
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Change category. With a non-empty transcript this starts a new thread.
    pub fn select_category(&mut self, category: Category) {
        if category != self.category && !self.messages.is_empty() {
            tracing::info!("Category changed to {}, starting a new thread", category.label());
            self.messages.clear();
            self.conversation_id.clear();
            self.last_error = None;
        }
        self.category = category;
    }

    /// Enter the chat screen with only the opener message. No network call.
    pub fn start_chat(&mut self) {
        self.screen = Screen::Chat;
        self.messages = vec![ChatMessage::opener(self.category)];
        self.is_loading = false;
        self.last_error = None;
    }

    /// Leave the chat screen without touching the transcript
    pub fn back_to_categories(&mut self) {
        self.screen = Screen::CategorySelect;
    }

    /// Return to the initial screen and forget the session
    pub fn reset_to_initial(&mut self) {
        self.screen = Screen::CategorySelect;
        self.messages.clear();
        self.conversation_id.clear();
        self.last_error = None;
        self.is_loading = false;
    }

    /// Start a turn. Returns `None` for blank text or while a turn is in flight.
    pub fn begin_turn(&mut self, text: &str) -> Option<Turn> {
        let query = text.trim();
        if query.is_empty() || self.is_loading {
            return None;
        }

        let placeholder = ChatMessage::assistant_placeholder();
        let turn = Turn {
            query: query.to_string(),
            assistant_id: placeholder.id.clone(),
        };

        self.messages.push(ChatMessage::user(query));
        self.messages.push(placeholder);
        self.is_loading = true;
        self.last_error = None;
        Some(turn)
    }

    /// Request the transport should send for this turn
    pub fn turn_request(&self, turn: &Turn) -> TurnRequest {
        TurnRequest {
            query: turn.query.clone(),
            category: self.category,
            conversation_id: self.conversation_id.clone(),
            user: self.user.clone(),
        }
    }

    /// Fold one upstream event into the transcript
    pub fn apply_event(&mut self, turn: &Turn, event: StreamEvent) -> Result<(), TurnError> {
        match event {
            StreamEvent::Message { answer, .. } => {
                if let Some(answer) = answer.filter(|a| !a.is_empty()) {
                    if let Some(msg) = self.message_mut(&turn.assistant_id) {
                        msg.text.push_str(&answer);
                        msg.is_loading = false;
                    }
                }
            }
            StreamEvent::WorkflowStarted { conversation_id } => {
                if let Some(id) = conversation_id.filter(|id| !id.is_empty()) {
                    tracing::debug!("Workflow started: conversation_id={}", id);
                    self.conversation_id = id;
                }
            }
            StreamEvent::WorkflowFinished => {
                tracing::debug!("Workflow finished");
                self.is_loading = false;
            }
            event @ StreamEvent::Error { .. } => {
                let text = event.error_text().unwrap_or_default();
                tracing::error!("Error event: {}", text);
                return Err(TurnError::Stream(text));
            }
            StreamEvent::Other => {}
        }
        Ok(())
    }

    /// Close a turn whose stream ended normally
    pub fn finish_turn(&mut self, turn: &Turn) {
        self.is_loading = false;
        if let Some(msg) = self.message_mut(&turn.assistant_id) {
            msg.is_streaming = false;
            msg.is_loading = false;
        }
    }

    /// Close a failed turn, leaving the conversation ready for a retry
    pub fn fail_turn(&mut self, turn: &Turn, err: TurnError) {
        match err.classify() {
            TurnError::SessionExpired(text) => {
                tracing::warn!("Resetting conversation_id: {}", text);
                self.conversation_id.clear();
                self.last_error = Some(SESSION_RESET_NOTICE.to_string());
            }
            other => {
                let text = other.to_string();
                tracing::error!("Turn failed: {}", text);
                self.last_error = Some(if text.is_empty() {
                    "An error occurred while sending the message".to_string()
                } else {
                    text
                });
            }
        }

        self.is_loading = false;
        if let Some(msg) = self.message_mut(&turn.assistant_id) {
            msg.text = FAILURE_NOTICE.to_string();
            msg.is_streaming = false;
            msg.is_loading = false;
        }
    }

    /// Send a message and stream the answer into the transcript.
    ///
    /// `on_update` sees the assistant message after every applied event and
    /// once more when the turn closes. Returns `false` if the send was a no-op.
    pub async fn send<T, F>(&mut self, transport: &T, text: &str, mut on_update: F) -> bool
    where
        T: ChatTransport + ?Sized,
        F: FnMut(&ChatMessage),
    {
        let Some(turn) = self.begin_turn(text) else {
            tracing::debug!("Ignoring send: empty message or turn in flight");
            return false;
        };

        match self.run_turn(transport, &turn, &mut on_update).await {
            Ok(()) => self.finish_turn(&turn),
            Err(err) => self.fail_turn(&turn, err),
        }

        if let Some(msg) = self.message(&turn.assistant_id) {
            on_update(msg);
        }
        true
    }

    /// Send the opener's sentinel message through the normal path
    pub async fn begin<T, F>(&mut self, transport: &T, on_update: F) -> bool
    where
        T: ChatTransport + ?Sized,
        F: FnMut(&ChatMessage),
    {
        self.send(transport, BEGIN_SENTINEL, on_update).await
    }

    async fn run_turn<T, F>(
        &mut self,
        transport: &T,
        turn: &Turn,
        on_update: &mut F,
    ) -> Result<(), TurnError>
    where
        T: ChatTransport + ?Sized,
        F: FnMut(&ChatMessage),
    {
        let request = self.turn_request(turn);
        let mut events = transport.open(&request).await?;

        while let Some(event) = events.next().await {
            self.apply_event(turn, event?)?;
            if let Some(msg) = self.message(&turn.assistant_id) {
                on_update(msg);
            }
        }
        tracing::debug!("Stream reading completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EventStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Transport replaying a canned SSE body through the real line decoder
    struct FakeTransport {
        reply: Result<Vec<&'static str>, (u16, &'static str)>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl FakeTransport {
        fn streaming(chunks: Vec<&'static str>) -> Self {
            Self {
                reply: Ok(chunks),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(status: u16, message: &'static str) -> Self {
            Self {
                reply: Err((status, message)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn open(&self, request: &TurnRequest) -> Result<EventStream, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(chunks) => {
                    let items: Vec<Result<Bytes, TransportError>> = chunks
                        .iter()
                        .copied()
                        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                        .collect();
                    Ok(Box::pin(crate::sse::event_stream(futures::stream::iter(
                        items,
                    ))))
                }
                Err((status, message)) => Err(TransportError::Status {
                    status: *status,
                    message: message.to_string(),
                }),
            }
        }
    }

    fn chatting(category: Category) -> Conversation {
        let mut conversation = Conversation::new(category);
        conversation.start_chat();
        conversation
    }

    fn last(conversation: &Conversation) -> &ChatMessage {
        conversation.messages().last().unwrap()
    }

    #[tokio::test]
    async fn test_fragments_concatenate_in_order() {
        let transport = FakeTransport::streaming(vec![
            "data: {\"event\":\"message\",\"answer\":\"A\"}\n",
            "data: {\"event\":\"message\",\"answer\":\"B\"}\n",
        ]);
        let mut conversation = chatting(Category::General);

        let mut seen = Vec::new();
        let sent = conversation
            .send(&transport, "hello", |msg| seen.push(msg.text.clone()))
            .await;

        assert!(sent);
        let answer = last(&conversation);
        assert_eq!(answer.role, Role::Assistant);
        assert_eq!(answer.text, "AB");
        assert!(!answer.is_streaming);
        assert!(!answer.is_loading);
        assert!(!conversation.is_loading());
        assert_eq!(seen, vec!["A", "AB", "AB"]);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_abort_turn() {
        let transport = FakeTransport::streaming(vec![
            "data: {\"event\":\"message\",\"answer\":\"A\"}\n",
            "data: {not json\n",
            "data: {\"event\":\"message\",\"answer\":\"B\"}\n",
        ]);
        let mut conversation = chatting(Category::General);
        conversation.send(&transport, "hello", |_| {}).await;

        assert_eq!(last(&conversation).text, "AB");
        assert!(conversation.last_error().is_none());
    }

    #[tokio::test]
    async fn test_workflow_started_adopts_conversation_id() {
        let transport = FakeTransport::streaming(vec![
            "data: {\"event\":\"workflow_started\",\"conversation_id\":\"xyz\"}\n",
            "data: {\"event\":\"message\",\"answer\":\"Hi\",\"conversation_id\":\"other\"}\n",
            "data: {\"event\":\"workflow_finished\"}\n",
        ]);
        let mut conversation = chatting(Category::General);
        conversation.send(&transport, "hello", |_| {}).await;

        assert_eq!(conversation.conversation_id(), "xyz");
        assert_eq!(transport.requests()[0].conversation_id, "");

        conversation.send(&transport, "again", |_| {}).await;
        assert_eq!(transport.requests()[1].conversation_id, "xyz");
    }

    #[tokio::test]
    async fn test_error_event_aborts_turn() {
        let transport = FakeTransport::streaming(vec![
            "data: {\"event\":\"message\",\"answer\":\"partial\"}\n",
            "data: {\"event\":\"error\",\"error\":\"model overloaded\"}\n",
            "data: {\"event\":\"message\",\"answer\":\"never applied\"}\n",
        ]);
        let mut conversation = chatting(Category::General);
        conversation.send(&transport, "hello", |_| {}).await;

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].text, "hello");
        assert_eq!(messages[2].text, FAILURE_NOTICE);
        assert!(!messages[2].is_loading);
        assert!(!messages[2].is_streaming);
        assert_eq!(conversation.last_error(), Some("model overloaded"));
        assert!(!conversation.is_loading());
    }

    #[tokio::test]
    async fn test_session_expired_resets_conversation_id() {
        let ok = FakeTransport::streaming(vec![
            "data: {\"event\":\"workflow_started\",\"conversation_id\":\"old\"}\n",
        ]);
        let mut conversation = chatting(Category::General);
        conversation.send(&ok, "first", |_| {}).await;
        assert_eq!(conversation.conversation_id(), "old");

        let gone = FakeTransport::failing(500, "Conversation Not Exists.");
        conversation.send(&gone, "second", |_| {}).await;

        assert_eq!(conversation.conversation_id(), "");
        assert_eq!(conversation.last_error(), Some(SESSION_RESET_NOTICE));
        assert_eq!(last(&conversation).text, FAILURE_NOTICE);
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_raw_text() {
        let transport = FakeTransport::failing(500, "HTTP error! status: 502");
        let mut conversation = chatting(Category::General);
        conversation.send(&transport, "hello", |_| {}).await;

        assert_eq!(conversation.last_error(), Some("HTTP error! status: 502"));
        assert!(!conversation.is_loading());
    }

    #[tokio::test]
    async fn test_send_while_loading_is_noop() {
        let transport = FakeTransport::streaming(vec![]);
        let mut conversation = chatting(Category::General);

        let turn = conversation.begin_turn("first").unwrap();
        let len = conversation.messages().len();

        assert!(conversation.begin_turn("second").is_none());
        assert!(!conversation.send(&transport, "third", |_| {}).await);
        assert_eq!(conversation.messages().len(), len);
        assert!(transport.requests().is_empty());

        conversation.finish_turn(&turn);
        assert!(conversation.begin_turn("fourth").is_some());
    }

    #[tokio::test]
    async fn test_blank_message_is_noop() {
        let transport = FakeTransport::streaming(vec![]);
        let mut conversation = chatting(Category::General);

        assert!(!conversation.send(&transport, "   \n", |_| {}).await);
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn test_category_switch_with_transcript_is_hard_reset() {
        let mut conversation = chatting(Category::General);
        let turn = conversation.begin_turn("hello").unwrap();
        conversation
            .apply_event(
                &turn,
                StreamEvent::WorkflowStarted {
                    conversation_id: Some("c1".into()),
                },
            )
            .unwrap();
        conversation.finish_turn(&turn);

        conversation.select_category(Category::Education);

        assert_eq!(conversation.category(), Category::Education);
        assert!(conversation.messages().is_empty());
        assert_eq!(conversation.conversation_id(), "");
    }

    #[test]
    fn test_category_switch_with_empty_transcript() {
        let mut conversation = Conversation::new(Category::General);
        conversation.select_category(Category::Chapter);

        assert_eq!(conversation.category(), Category::Chapter);
        assert!(conversation.messages().is_empty());
        assert!(conversation.last_error().is_none());
        assert_eq!(conversation.screen(), Screen::CategorySelect);
    }

    #[test]
    fn test_start_chat_injects_opener() {
        let mut conversation = Conversation::new(Category::Chapter);
        conversation.start_chat();

        assert_eq!(conversation.screen(), Screen::Chat);
        let opener = &conversation.messages()[0];
        assert!(opener.is_opener);
        assert_eq!(opener.role, Role::Assistant);
        assert!(opener.text.contains("Chapter-specific"));
        assert!(!conversation.is_loading());
    }

    #[tokio::test]
    async fn test_begin_sends_sentinel() {
        let transport = FakeTransport::streaming(vec![
            "data: {\"event\":\"message\",\"answer\":\"Welcome\"}\n",
        ]);
        let mut conversation = chatting(Category::Education).with_user("front-desk");
        conversation.begin(&transport, |_| {}).await;

        let request = &transport.requests()[0];
        assert_eq!(request.query, BEGIN_SENTINEL);
        assert_eq!(request.category, Category::Education);
        assert_eq!(request.user.as_deref(), Some("front-desk"));
        assert_eq!(conversation.messages()[1].text, BEGIN_SENTINEL);
    }

    #[test]
    fn test_workflow_finished_clears_loading_before_stream_end() {
        let mut conversation = chatting(Category::General);
        let turn = conversation.begin_turn("hello").unwrap();
        assert!(conversation.is_loading());

        conversation
            .apply_event(&turn, StreamEvent::WorkflowFinished)
            .unwrap();
        assert!(!conversation.is_loading());
        assert!(conversation.message(&turn.assistant_id).unwrap().is_streaming);
    }

    #[test]
    fn test_reset_to_initial() {
        let mut conversation = chatting(Category::General);
        conversation.begin_turn("hello").unwrap();
        conversation.reset_to_initial();

        assert_eq!(conversation.screen(), Screen::CategorySelect);
        assert!(conversation.messages().is_empty());
        assert!(!conversation.is_loading());
    }

    #[test]
    fn test_category_wire_values() {
        assert_eq!(Category::from_wire("Chapter"), Some(Category::Chapter));
        assert_eq!(Category::from_wire("unknown"), None);
        assert_eq!(
            serde_json::to_string(&Category::Education).unwrap(),
            "\"education\""
        );
    }
}
