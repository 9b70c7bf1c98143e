pub mod gemini;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Handle the hosted service side uses to find a conversation.
pub type SessionId = String;

/// Ordered text deltas of one streamed reply.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// One turn of conversation history as sent to the hosted model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Conversational side of the hosted model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a conversation bound to `system_instruction`.
    async fn create_session(&self, system_instruction: String) -> Result<SessionId, LlmError>;

    /// Send one user turn and stream the reply back as deltas.
    async fn stream_message(&self, session: &str, text: &str) -> Result<TextStream, LlmError>;

    /// Release a conversation. Unknown ids are ignored.
    async fn close_session(&self, session: &str);
}

/// Document transcription (OCR) side of the hosted model.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(
        &self,
        data: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unknown chat session: {0}")]
    UnknownSession(String),
}
