use crate::config::{Config, ConfigError};
use crate::llm::{ChatBackend, LlmError, SessionId, TextStream};
use std::sync::Arc;

/// A conversation bound to one document's text. Cheap to clone; the history
/// itself lives behind the backend.
#[derive(Clone)]
pub struct ChatSession {
    id: SessionId,
    backend: Arc<dyn ChatBackend>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession").field("id", &self.id).finish()
    }
}

impl ChatSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn send_message_stream(&self, text: &str) -> Result<TextStream, LlmError> {
        self.backend.stream_message(&self.id, text).await
    }

    pub async fn close(self) {
        self.backend.close_session(&self.id).await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to create chat session: {0}")]
    Llm(#[from] LlmError),
}

/// System instruction for a document chat. The document text is embedded
/// verbatim between the start/end markers.
pub fn build_system_instruction(document_text: &str, language: &str) -> String {
    format!(
        "\
# INSTRUÇÕES FUNDAMENTAIS

1.  **FONTE ÚNICA DA VERDADE:** Sua única e exclusiva fonte de informação é o documento fornecido abaixo. Você está estritamente proibido de usar conhecimento externo, dados de treinamento prévio ou acesso à internet.
2.  **SEM ALUCINAÇÕES:** Não invente respostas nem adivinhe informações que não estão explicitamente no texto. Se a informação não existe no documento, diga isso claramente.
3.  **CITAÇÕES OBRIGATÓRIAS:** TODA informação que você fornecer deve vir acompanhada da citação da página correspondente, no formato [Página X]. Se a informação abrange várias páginas, use [Página X, Y]. A citação nunca é opcional.

# INTERAÇÃO COM O USUÁRIO

1.  **IDIOMA:** Responda sempre em {language}.
2.  **FLEXIBILIDADE COM ERROS:** Se o usuário cometer um erro de digitação óbvio (ex: 'incrição' em vez de 'inscrição'), entenda a intenção, busque o termo correto no documento e responda como se a palavra certa tivesse sido digitada.
3.  **COMPREENSÃO COLOQUIAL:** Entenda perguntas com gírias ou linguagem informal. O objetivo é entender a intenção, não corrigir a ortografia.
4.  **PEDIDO DE ESCLARECIMENTO:** Só peça esclarecimento se a pergunta for genuinamente ambígua ou se um erro de digitação puder se referir a conceitos diferentes do documento.

# CONTEXTO DO DOCUMENTO

O texto completo do documento está abaixo, com cada página marcada por `--- Página N ---`. Use-o para responder a todas as perguntas.

--- INÍCIO DO DOCUMENTO ---
{document_text}
--- FIM DO DOCUMENTO ---
"
    )
}

/// Open a chat over `document_text`. Refuses to start without a credential.
pub async fn create_document_chat(
    backend: Arc<dyn ChatBackend>,
    config: &Config,
    document_text: &str,
) -> Result<ChatSession, SessionError> {
    config.api_key()?;

    let instruction = build_system_instruction(document_text, &config.language);
    let id = backend.create_session(instruction).await?;
    tracing::info!(session = %id, chars = document_text.len(), "document chat ready");
    Ok(ChatSession { id, backend })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::{FakeChat, Reply};
    use futures::StreamExt;

    #[test]
    fn test_instruction_embeds_document_and_rules() {
        let text = "--- Página 1 ---\nInscrições até 10/03.\n\n";
        let instruction = build_system_instruction(text, "português do Brasil");

        assert!(instruction.contains(text));
        assert!(instruction.contains("[Página X]"));
        assert!(instruction.contains("[Página X, Y]"));
        assert!(instruction.contains("Responda sempre em português do Brasil."));
        assert!(instruction.contains("conhecimento externo"));

        let start = instruction.find("--- INÍCIO DO DOCUMENTO ---").unwrap();
        let end = instruction.find("--- FIM DO DOCUMENTO ---").unwrap();
        assert!(start < instruction.find(text).unwrap());
        assert!(end > instruction.find(text).unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let backend = Arc::new(FakeChat::default());
        let result = create_document_chat(backend.clone(), &Config::default(), "texto").await;

        assert!(matches!(
            result,
            Err(SessionError::Config(ConfigError::MissingApiKey))
        ));
        assert!(backend.instructions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_refusal_is_llm_error() {
        let backend = Arc::new(FakeChat {
            fail_create: true,
            ..Default::default()
        });
        let config = Config::default().with_api_key("key");
        let result = create_document_chat(backend, &config, "texto").await;
        assert!(matches!(result, Err(SessionError::Llm(_))));
    }

    #[tokio::test]
    async fn test_session_streams_through_backend() {
        let backend = Arc::new(FakeChat::with_replies(vec![Reply::text(&["a", "b"])]));
        let config = Config::default().with_api_key("key");
        let session = create_document_chat(backend.clone(), &config, "doc").await.unwrap();

        assert_eq!(session.id(), "session-1");
        let deltas: Vec<String> = session
            .send_message_stream("oi")
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["a", "b"]);
        assert_eq!(backend.sent_texts(), vec!["oi"]);
    }
}
