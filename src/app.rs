use crate::chat::{ChatController, Message, TurnOutcome};
use crate::config::Config;
use crate::doc_processor::{DocumentFile, TextExtractor};
use crate::llm::{ChatBackend, LlmError, TranscriptionBackend};
use crate::ocr::perform_ocr;
use crate::session::{create_document_chat, ChatSession, SessionError};
use crate::viewer::{resolve_page_count, DocumentViewer};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    Local,
    Ocr,
}

/// A document that made it through intake.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub name: String,
    pub size: usize,
    pub page_count: Option<u32>,
    pub text: String,
    pub source: TextSource,
}

/// Intake failures. `Display` is the message shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Por favor, selecione um arquivo PDF válido.")]
    InvalidFileType { mime_type: String },
    #[error("A IA não conseguiu processar o documento.")]
    Ocr(#[source] LlmError),
    #[error("Não foi possível extrair nenhum texto do documento com a IA. O arquivo pode estar corrompido ou ser muito complexo.")]
    NoText,
    #[error("Falha ao preparar o assistente de chat.")]
    Session(#[from] SessionError),
}

pub const LOADING_EXTRACT: &str = "Extraindo o texto do documento...";
pub const LOADING_OCR: &str =
    "Analisando documento com IA para extrair o texto... Isso pode levar um momento.";
pub const LOADING_SESSION: &str = "Preparando o assistente de chat...";

pub struct App {
    config: Config,
    extractor: Arc<dyn TextExtractor>,
    chat_backend: Arc<dyn ChatBackend>,
    ocr_backend: Arc<dyn TranscriptionBackend>,
    document: Option<LoadedDocument>,
    chat: ChatController,
    viewer: DocumentViewer,
    loading: Option<&'static str>,
    error: Option<String>,
}

impl App {
    pub fn new(
        config: Config,
        extractor: Arc<dyn TextExtractor>,
        chat_backend: Arc<dyn ChatBackend>,
        ocr_backend: Arc<dyn TranscriptionBackend>,
    ) -> Self {
        Self {
            config,
            extractor,
            chat_backend,
            ocr_backend,
            document: None,
            chat: ChatController::new(),
            viewer: DocumentViewer::new(),
            loading: None,
            error: None,
        }
    }

    pub fn document(&self) -> Option<&LoadedDocument> {
        self.document.as_ref()
    }

    pub fn chat(&self) -> &ChatController {
        &self.chat
    }

    pub fn viewer(&self) -> &DocumentViewer {
        &self.viewer
    }

    pub fn viewer_mut(&mut self) -> &mut DocumentViewer {
        &mut self.viewer
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn loading_message(&self) -> Option<&'static str> {
        self.loading
    }

    /// Run a file through intake. On success the new document replaces the
    /// old one wholesale; on any failure after validation nothing of the old
    /// or new document remains.
    pub async fn load_document(
        &mut self,
        file: DocumentFile,
        mut on_progress: impl FnMut(&'static str),
    ) -> Result<&LoadedDocument, IntakeError> {
        if !file.is_pdf() {
            let err = IntakeError::InvalidFileType {
                mime_type: file.mime_type.clone(),
            };
            tracing::info!(file = %file.name, mime = %file.mime_type, "rejected non-PDF upload");
            self.error = Some(err.to_string());
            return Err(err);
        }

        self.error = None;
        self.document = None;
        if let Some(previous) = self.chat.detach_session() {
            previous.close().await;
        }
        self.viewer.unload();

        let result = self.intake(&file, &mut on_progress).await;
        self.loading = None;

        match result {
            Ok((document, session)) => {
                tracing::info!(
                    file = %document.name,
                    pages = ?document.page_count,
                    source = ?document.source,
                    "document loaded"
                );
                self.viewer.load(document.page_count, &document.text);
                self.chat.attach_session(session);
                Ok(&*self.document.insert(document))
            }
            Err(err) => {
                match &err {
                    IntakeError::Ocr(cause) => tracing::error!("OCR failed: {}", cause),
                    IntakeError::Session(cause) => tracing::error!("session failed: {}", cause),
                    other => tracing::warn!("intake failed: {}", other),
                }
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn intake(
        &mut self,
        file: &DocumentFile,
        on_progress: &mut dyn FnMut(&'static str),
    ) -> Result<(LoadedDocument, ChatSession), IntakeError> {
        self.set_loading(LOADING_EXTRACT, on_progress);
        let extractor = Arc::clone(&self.extractor);
        let bytes = file.bytes.clone();
        let local = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("extraction task failed: {}", e);
                String::new()
            });

        let (text, source) = if local.trim().is_empty() {
            self.set_loading(LOADING_OCR, on_progress);
            let transcript = perform_ocr(self.ocr_backend.as_ref(), file)
                .await
                .map_err(IntakeError::Ocr)?;
            if transcript.trim().is_empty() {
                return Err(IntakeError::NoText);
            }
            (transcript, TextSource::Ocr)
        } else {
            (local, TextSource::Local)
        };

        self.set_loading(LOADING_SESSION, on_progress);
        let session =
            create_document_chat(Arc::clone(&self.chat_backend), &self.config, &text).await?;

        let document = LoadedDocument {
            name: file.name.clone(),
            size: file.bytes.len(),
            page_count: resolve_page_count(&file.bytes, &text),
            text,
            source,
        };
        Ok((document, session))
    }

    fn set_loading(&mut self, message: &'static str, on_progress: &mut dyn FnMut(&'static str)) {
        self.loading = Some(message);
        on_progress(message);
    }

    pub async fn send_message(
        &mut self,
        input: &str,
        on_update: impl FnMut(&Message),
    ) -> Option<TurnOutcome> {
        if self.loading.is_some() {
            return None;
        }
        self.chat.send_message(input, on_update).await
    }

    /// A citation was activated: show the cited page.
    pub fn open_citation(&mut self, page: u32) -> bool {
        self.viewer.go_to_page(page)
    }
}
