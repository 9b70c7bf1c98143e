use crate::llm::LlmError;
use crate::session::ChatSession;
use futures::StreamExt;

pub const GREETING: &str =
    "Olá! Estou pronto para responder perguntas sobre o documento que você enviou.";
pub const APOLOGY: &str = "Desculpe, encontrei um erro. Por favor, tente novamente.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        let prefix = match role {
            Role::User => "user",
            Role::Bot => "bot",
        };
        Self {
            id: format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingFirstToken,
    Streaming,
    Settled(TurnOutcome),
}

impl TurnState {
    pub fn is_open(&self) -> bool {
        matches!(self, TurnState::AwaitingFirstToken | TurnState::Streaming)
    }
}

/// A turn that has been accepted and is waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub bot_message_id: String,
    pub text: String,
}

/// One turn at a time: `Idle → AwaitingFirstToken → Streaming → Settled`.
/// Submissions while a turn is open are ignored.
#[derive(Debug)]
pub struct ChatController {
    session: Option<ChatSession>,
    messages: Vec<Message>,
    state: TurnState,
    pending: Option<String>,
}

impl Default for ChatController {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatController {
    pub fn new() -> Self {
        Self {
            session: None,
            messages: Vec::new(),
            state: TurnState::Idle,
            pending: None,
        }
    }

    /// Bind a fresh session. The conversation restarts with the greeting.
    pub fn attach_session(&mut self, session: ChatSession) {
        self.session = Some(session);
        self.messages = vec![Message::new(Role::Bot, GREETING)];
        self.state = TurnState::Idle;
        self.pending = None;
    }

    /// Drop the conversation. Returns the session so the caller can close it.
    pub fn detach_session(&mut self) -> Option<ChatSession> {
        std::mem::take(self).session
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_open()
    }

    pub fn can_submit(&self, input: &str) -> bool {
        !input.trim().is_empty() && self.session.is_some() && !self.is_busy()
    }

    pub fn last_bot_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Bot)
    }

    /// Accept a user turn: append it plus an empty bot placeholder. Returns
    /// `None` (and changes nothing) when the turn can't start.
    pub fn begin_turn(&mut self, input: &str) -> Option<PendingTurn> {
        if !self.can_submit(input) {
            return None;
        }

        self.messages.push(Message::new(Role::User, input));
        let placeholder = Message::new(Role::Bot, "");
        let bot_message_id = placeholder.id.clone();
        self.messages.push(placeholder);

        self.pending = Some(bot_message_id.clone());
        self.state = TurnState::AwaitingFirstToken;
        Some(PendingTurn {
            bot_message_id,
            text: input.to_string(),
        })
    }

    fn placeholder_mut(&mut self) -> Option<&mut Message> {
        let id = self.pending.as_deref()?;
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Append one streamed delta to the placeholder.
    pub fn apply_chunk(&mut self, delta: &str) -> Option<&Message> {
        if !self.state.is_open() {
            return None;
        }
        self.state = TurnState::Streaming;
        let message = self.placeholder_mut()?;
        message.content.push_str(delta);
        Some(&*message)
    }

    /// Close the open turn. On failure whatever streamed so far is dropped
    /// and the placeholder shows the apology instead.
    pub fn settle(&mut self, result: Result<(), LlmError>) -> TurnOutcome {
        let outcome = match result {
            Ok(()) => TurnOutcome::Ok,
            Err(e) => {
                tracing::warn!("chat turn failed: {}", e);
                if let Some(message) = self.placeholder_mut() {
                    message.content = APOLOGY.to_string();
                }
                TurnOutcome::Error
            }
        };
        self.pending = None;
        self.state = TurnState::Settled(outcome);
        outcome
    }

    /// Run one full turn against the session, calling `on_update` with the
    /// bot message after every delta. Returns `None` when the submission was
    /// ignored.
    pub async fn send_message(
        &mut self,
        input: &str,
        mut on_update: impl FnMut(&Message),
    ) -> Option<TurnOutcome> {
        let turn = self.begin_turn(input)?;
        let session = self.session.clone()?;

        let result = match session.send_message_stream(&turn.text).await {
            Ok(mut stream) => loop {
                match stream.next().await {
                    Some(Ok(delta)) => {
                        if let Some(message) = self.apply_chunk(&delta) {
                            on_update(message);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                }
            },
            Err(e) => Err(e),
        };

        let outcome = self.settle(result);
        if let Some(message) = self.messages.last() {
            on_update(message);
        }
        Some(outcome)
    }
}
