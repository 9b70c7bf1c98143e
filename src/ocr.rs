use crate::doc_processor::DocumentFile;
use crate::llm::{LlmError, TranscriptionBackend};

pub const OCR_INSTRUCTION: &str = "\
Transcreva integralmente o texto deste documento PDF, página por página.
Antes do conteúdo de cada página escreva o marcador `--- Página X ---`, onde X é o número da página começando em 1.
Se uma página estiver em branco ou não tiver texto legível, escreva `[Página em branco]` abaixo do marcador.
Mantenha o idioma original do documento. Não resuma, não traduza e não acrescente comentários.";

/// Send the whole file to the hosted model and return its transcript.
/// No retry: a failure here ends the intake.
pub async fn perform_ocr(
    backend: &dyn TranscriptionBackend,
    file: &DocumentFile,
) -> Result<String, LlmError> {
    tracing::info!(file = %file.name, bytes = file.bytes.len(), "running OCR fallback");
    let transcript = backend
        .transcribe(&file.bytes, &file.mime_type, OCR_INSTRUCTION)
        .await?;
    tracing::debug!(chars = transcript.len(), "OCR transcript received");
    Ok(transcript)
}
