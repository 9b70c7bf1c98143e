use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

pub const PDF_MIME: &str = "application/pdf";

/// An uploaded file, as received from the user.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk and work out its MIME type.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let mime_type = detect_mime_type(&bytes).to_string();
        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == PDF_MIME
    }
}

/// How far into the file the `%PDF-` header may start.
const PDF_HEADER_WINDOW: usize = 1024;

/// Decided by content only: a renamed non-PDF must not get past intake.
fn detect_mime_type(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        PDF_MIME
    } else {
        "application/octet-stream"
    }
}

/// Local text extraction. Implementations never fail: anything that goes
/// wrong yields an empty string, which callers treat as "try OCR".
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> String;
}

/// [`TextExtractor`] backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> String {
        extract_text_from_pdf(bytes)
    }
}

/// Extract the text of every page, each block under a `--- Página i ---`
/// header. Returns an empty string when the PDF can't be parsed or when no
/// page has any text (scanned documents).
pub fn extract_text_from_pdf(bytes: &[u8]) -> String {
    match extract_pages(bytes) {
        Ok(pages) => {
            let pages: Vec<String> = pages.iter().map(|p| normalize_whitespace(p)).collect();
            if pages.iter().all(|p| p.is_empty()) {
                tracing::debug!(pages = pages.len(), "PDF has no extractable text");
                return String::new();
            }
            format_pages(&pages)
        }
        Err(e) => {
            tracing::warn!("local PDF extraction failed: {}", e);
            String::new()
        }
    }
}

// pdf-extract panics on some malformed input instead of returning an error.
fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(format!("PDF parse error: {}", e)),
        Err(_) => Err("PDF parser panicked (malformed document)".into()),
    }
}

/// Join per-page text into the document text the assistant sees.
/// Pages are numbered from 1 in input order.
pub fn format_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for (i, page) in pages.iter().enumerate() {
        text.push_str(&page_header(i as u32 + 1));
        text.push('\n');
        text.push_str(page);
        text.push_str("\n\n");
    }
    text
}

pub fn page_header(page: u32) -> String {
    format!("--- Página {} ---", page)
}

/// Collapse every run of whitespace into one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\n b\t c  "), "a b c");
        assert_eq!(normalize_whitespace(" \n\t "), "");
    }

    #[test]
    fn test_format_pages_headers() {
        let text = format_pages(&["Edital de seleção".into(), "Prazo: 10 dias".into()]);
        assert_eq!(
            text,
            "--- Página 1 ---\nEdital de seleção\n\n--- Página 2 ---\nPrazo: 10 dias\n\n"
        );
    }

    #[test]
    fn test_garbage_bytes_degrade_to_empty() {
        assert_eq!(extract_text_from_pdf(b"this is not a pdf"), "");
        assert_eq!(extract_text_from_pdf(b""), "");
        assert_eq!(PdfTextExtractor.extract(b"%PDF-1.4 truncated"), "");
    }

    #[test]
    fn test_mime_sniffing() {
        assert_eq!(detect_mime_type(b"%PDF-1.7\n..."), PDF_MIME);
        assert_eq!(detect_mime_type(b"hello"), "application/octet-stream");
        assert_eq!(detect_mime_type(b""), "application/octet-stream");
    }

    #[test]
    fn test_pdf_header_after_leading_bytes() {
        let mut bytes = vec![0u8; 512];
        bytes.extend_from_slice(b"%PDF-1.4\n1 0 obj");
        assert_eq!(detect_mime_type(&bytes), PDF_MIME);

        let mut late = vec![b' '; PDF_HEADER_WINDOW];
        late.extend_from_slice(b"%PDF-1.4");
        assert_eq!(detect_mime_type(&late), "application/octet-stream");
    }

    #[test]
    fn test_document_file_is_pdf() {
        assert!(DocumentFile::new("edital.pdf", PDF_MIME, vec![]).is_pdf());
        assert!(!DocumentFile::new("foto.png", "image/png", vec![]).is_pdf());
    }
}
