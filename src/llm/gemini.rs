use super::{ChatBackend, ChatMessage, LlmError, SessionId, TextStream, TranscriptionBackend};
use crate::config::{Config, ConfigError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::{Stream, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub ocr_model: String,
}

impl GeminiConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config.api_key()?;
        Ok(Self {
            api_key: SecretString::from(api_key.expose_secret().to_owned()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            ocr_model: config.ocr_model.clone(),
        })
    }
}

/// The REST API is stateless, so conversations live here: each session keeps
/// its system instruction and the turns that completed successfully.
struct SessionState {
    system_instruction: String,
    history: Vec<ChatMessage>,
}

type Sessions = Arc<Mutex<HashMap<SessionId, SessionState>>>;

pub struct GeminiBackend {
    config: GeminiConfig,
    client: Client,
    sessions: Sessions,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn history(&self, session: &str) -> Result<(String, Vec<ChatMessage>), LlmError> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let state = sessions
            .get(session)
            .ok_or_else(|| LlmError::UnknownSession(session.to_string()))?;
        Ok((state.system_instruction.clone(), state.history.clone()))
    }
}

// ── Wire types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Content {
            role: role.map(str::to_string),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Part {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }

    fn into_result(self) -> Result<String, LlmError> {
        match self.error {
            Some(err) => Err(LlmError::Api {
                status: err.code,
                message: err.message,
            }),
            None => Ok(self.text()),
        }
    }
}

fn build_chat_request(
    system_instruction: &str,
    history: &[ChatMessage],
    turn: &ChatMessage,
) -> GenerateContentRequest {
    let contents = history
        .iter()
        .chain(std::iter::once(turn))
        .map(|m| Content::text(Some(m.role.as_str()), &m.content))
        .collect();

    GenerateContentRequest {
        system_instruction: Some(Content::text(None, system_instruction)),
        contents,
    }
}

fn build_ocr_request(data: &[u8], mime_type: &str, instruction: &str) -> GenerateContentRequest {
    let document = Part {
        text: None,
        inline_data: Some(InlineData {
            mime_type: mime_type.to_string(),
            data: BASE64_STANDARD.encode(data),
        }),
    };

    GenerateContentRequest {
        system_instruction: None,
        contents: vec![Content {
            role: Some("user".into()),
            parts: vec![document, Part::text(instruction)],
        }],
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }
    Ok(resp)
}

// ── Server-sent events ──

/// Split complete lines off the front of `buffer`. Bytes are only decoded
/// once a full line is present, so multi-byte characters split across
/// network chunks survive.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).trim().to_string());
    }
    lines
}

/// Parse one SSE line into the text delta it carries, if any.
fn parse_sse_line(line: &str) -> Result<Option<String>, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let event: GenerateContentResponse = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("skipping unparseable stream event: {}", e);
            return Ok(None);
        }
    };
    let text = event.into_result()?;
    Ok((!text.is_empty()).then_some(text))
}

/// Forward every delta of `chunks` into `tx`. Returns the full reply text,
/// or `None` when the receiver went away before the reply finished.
async fn forward_sse<S, B>(
    chunks: S,
    tx: &mpsc::Sender<Result<String, LlmError>>,
) -> Result<Option<String>, LlmError>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    let mut full_content = String::new();
    let mut buffer: Vec<u8> = Vec::new();
    tokio::pin!(chunks);

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(chunk.as_ref());

        for line in drain_lines(&mut buffer) {
            if let Some(delta) = parse_sse_line(&line)? {
                full_content.push_str(&delta);
                if tx.send(Ok(delta)).await.is_err() {
                    return Ok(None);
                }
            }
        }
    }

    let tail = String::from_utf8_lossy(&buffer).trim().to_string();
    if let Some(delta) = parse_sse_line(&tail)? {
        full_content.push_str(&delta);
        if tx.send(Ok(delta)).await.is_err() {
            return Ok(None);
        }
    }

    Ok(Some(full_content))
}

/// Stream one turn to `tx`, then record it in the session history. Only a
/// reply that was delivered in full is recorded.
async fn relay_turn<S, B>(
    chunks: S,
    tx: mpsc::Sender<Result<String, LlmError>>,
    sessions: Sessions,
    session: String,
    turn: ChatMessage,
) where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    match forward_sse(chunks, &tx).await {
        Ok(Some(reply)) => {
            let mut sessions = sessions.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = sessions.get_mut(&session) {
                state.history.push(turn);
                state.history.push(ChatMessage {
                    role: "model".into(),
                    content: reply,
                });
            }
        }
        Ok(None) => tracing::debug!(session = %session, "reply abandoned by receiver"),
        Err(e) => {
            tracing::warn!(session = %session, "chat stream failed: {}", e);
            let _ = tx.send(Err(e)).await;
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    async fn create_session(&self, system_instruction: String) -> Result<SessionId, LlmError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            id.clone(),
            SessionState {
                system_instruction,
                history: Vec::new(),
            },
        );
        tracing::debug!(session = %id, model = %self.config.model, "chat session created");
        Ok(id)
    }

    async fn close_session(&self, session: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.remove(session).is_some() {
            tracing::debug!(session = %session, "chat session closed");
        }
    }

    async fn stream_message(&self, session: &str, text: &str) -> Result<TextStream, LlmError> {
        let (system_instruction, history) = self.history(session)?;
        let turn = ChatMessage {
            role: "user".into(),
            content: text.to_string(),
        };
        let body = build_chat_request(&system_instruction, &history, &turn);

        tracing::debug!(session = %session, turns = history.len(), "streaming chat turn");
        let resp = self
            .client
            .post(format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.config.base_url, self.config.model
            ))
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(relay_turn(
            resp.bytes_stream(),
            tx,
            Arc::clone(&self.sessions),
            session.to_string(),
            turn,
        ));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[async_trait]
impl TranscriptionBackend for GeminiBackend {
    async fn transcribe(
        &self,
        data: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String, LlmError> {
        let body = build_ocr_request(data, mime_type, instruction);

        tracing::debug!(bytes = data.len(), model = %self.config.ocr_model, "requesting transcription");
        let resp = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.config.base_url, self.config.ocr_model
            ))
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let parsed: GenerateContentResponse = resp.json().await?;
        parsed.into_result()
    }
}
