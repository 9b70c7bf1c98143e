use super::{ChatBackend, LlmError, SessionId, TextStream, TranscriptionBackend};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) fn api_error(message: &str) -> LlmError {
    LlmError::Api {
        status: 500,
        message: message.to_string(),
    }
}

/// What one call to `stream_message` does.
pub(crate) enum Reply {
    /// The request itself fails, before any delta.
    Reject(LlmError),
    /// The stream yields these items in order.
    Stream(Vec<Result<String, LlmError>>),
}

impl Reply {
    pub(crate) fn text(deltas: &[&str]) -> Self {
        Reply::Stream(deltas.iter().map(|d| Ok(d.to_string())).collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeChat {
    pub(crate) replies: Mutex<VecDeque<Reply>>,
    pub(crate) instructions: Mutex<Vec<String>>,
    pub(crate) sent: Mutex<Vec<(SessionId, String)>>,
    pub(crate) closed: Mutex<Vec<SessionId>>,
    pub(crate) fail_create: bool,
}

impl FakeChat {
    pub(crate) fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub(crate) fn closed(&self) -> Vec<SessionId> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn create_session(&self, system_instruction: String) -> Result<SessionId, LlmError> {
        if self.fail_create {
            return Err(api_error("session refused"));
        }
        let mut instructions = self.instructions.lock().unwrap();
        instructions.push(system_instruction);
        Ok(format!("session-{}", instructions.len()))
    }

    async fn stream_message(&self, session: &str, text: &str) -> Result<TextStream, LlmError> {
        self.sent
            .lock()
            .unwrap()
            .push((session.to_string(), text.to_string()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Stream(Vec::new()));
        match reply {
            Reply::Reject(e) => Err(e),
            Reply::Stream(items) => Ok(futures::stream::iter(items).boxed()),
        }
    }

    async fn close_session(&self, session: &str) {
        self.closed.lock().unwrap().push(session.to_string());
    }
}

pub(crate) struct FakeOcr {
    result: Mutex<Option<Result<String, LlmError>>>,
    pub(crate) calls: AtomicUsize,
}

impl FakeOcr {
    pub(crate) fn returning(result: Result<String, LlmError>) -> Self {
        Self {
            result: Mutex::new(Some(result)),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for FakeOcr {
    async fn transcribe(
        &self,
        _data: &[u8],
        _mime_type: &str,
        _instruction: &str,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(api_error("no scripted transcription left")))
    }
}
