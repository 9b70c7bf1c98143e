use crate::doc_processor::page_header;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct DocumentViewer {
    page_count: Option<u32>,
    current_page: u32,
    pages: BTreeMap<u32, String>,
}

impl Default for DocumentViewer {
    fn default() -> Self {
        Self {
            page_count: None,
            current_page: 1,
            pages: BTreeMap::new(),
        }
    }
}

impl DocumentViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a newly loaded document, starting at page 1.
    pub fn load(&mut self, page_count: Option<u32>, document_text: &str) {
        self.page_count = page_count.filter(|&n| n > 0);
        self.current_page = 1;
        self.pages = split_pages(document_text);
    }

    pub fn unload(&mut self) {
        *self = Self::default();
    }

    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Jump to `page`. Returns whether the page is now shown; out-of-range
    /// requests leave the viewer untouched.
    pub fn go_to_page(&mut self, page: u32) -> bool {
        match self.page_count {
            Some(count) if (1..=count).contains(&page) => {
                self.current_page = page;
                true
            }
            _ => false,
        }
    }

    pub fn next(&mut self) -> u32 {
        let last = self.page_count.unwrap_or(1);
        self.current_page = (self.current_page + 1).min(last);
        self.current_page
    }

    pub fn prev(&mut self) -> u32 {
        self.current_page = self.current_page.saturating_sub(1).max(1);
        self.current_page
    }

    /// Text of the current page, headed like the document text.
    pub fn render_current(&self) -> String {
        let header = match self.page_count {
            Some(count) => format!(
                "{} ({} de {})",
                page_header(self.current_page),
                self.current_page,
                count
            ),
            None => page_header(self.current_page),
        };
        let body = self
            .pages
            .get(&self.current_page)
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("[sem texto nesta página]");
        format!("{}\n{}", header, body.trim())
    }
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*---\s*Página\s+(\d+)\s*---\s*$").expect("page header regex is valid")
    })
}

/// Split document text on its `--- Página N ---` headers. Text before the
/// first header is ignored; a repeated header appends to the same page.
pub fn split_pages(text: &str) -> BTreeMap<u32, String> {
    let mut pages: BTreeMap<u32, String> = BTreeMap::new();
    let headers: Vec<(u32, usize, usize)> = header_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let page = caps[1].parse().ok()?;
            Some((page, whole.start(), whole.end()))
        })
        .collect();

    for (i, &(page, _, body_start)) in headers.iter().enumerate() {
        let body_end = headers.get(i + 1).map(|h| h.1).unwrap_or(text.len());
        let body = text[body_start..body_end].trim();
        let entry = pages.entry(page).or_default();
        if !entry.is_empty() && !body.is_empty() {
            entry.push('\n');
        }
        entry.push_str(body);
    }
    pages
}

/// Count pages by parsing the PDF structure. `None` when the file can't be
/// parsed.
pub fn count_pages(bytes: &[u8]) -> Option<u32> {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => u32::try_from(doc.get_pages().len()).ok().filter(|&n| n > 0),
        Err(e) => {
            tracing::debug!("could not count PDF pages: {}", e);
            None
        }
    }
}

/// Page count for the viewer: the PDF's own count, else the highest page
/// header in the document text.
pub fn resolve_page_count(bytes: &[u8], document_text: &str) -> Option<u32> {
    count_pages(bytes).or_else(|| split_pages(document_text).keys().next_back().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "--- Página 1 ---\nCapa\n\n--- Página 2 ---\nPrazo de inscrição\n\n--- Página 3 ---\n\n\n";

    fn loaded(count: u32) -> DocumentViewer {
        let mut viewer = DocumentViewer::new();
        viewer.load(Some(count), DOC);
        viewer
    }

    #[test]
    fn test_go_to_page_bounds() {
        let mut viewer = loaded(3);
        assert!(viewer.go_to_page(2));
        assert_eq!(viewer.current_page(), 2);

        assert!(!viewer.go_to_page(0));
        assert!(!viewer.go_to_page(4));
        assert_eq!(viewer.current_page(), 2);

        // idempotent
        assert!(viewer.go_to_page(3));
        assert!(viewer.go_to_page(3));
        assert_eq!(viewer.current_page(), 3);
    }

    #[test]
    fn test_no_jump_before_page_count_known() {
        let mut viewer = DocumentViewer::new();
        assert!(!viewer.go_to_page(1));
        assert_eq!(viewer.next(), 1);
        assert_eq!(viewer.prev(), 1);
    }

    #[test]
    fn test_next_prev_clamp() {
        let mut viewer = loaded(2);
        assert_eq!(viewer.prev(), 1);
        assert_eq!(viewer.next(), 2);
        assert_eq!(viewer.next(), 2);
        assert_eq!(viewer.prev(), 1);
    }

    #[test]
    fn test_load_resets_to_first_page() {
        let mut viewer = loaded(3);
        viewer.go_to_page(3);
        viewer.load(Some(5), DOC);
        assert_eq!(viewer.current_page(), 1);
        assert_eq!(viewer.page_count(), Some(5));

        viewer.unload();
        assert_eq!(viewer.page_count(), None);
    }

    #[test]
    fn test_split_pages() {
        let pages = split_pages(DOC);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[&1], "Capa");
        assert_eq!(pages[&2], "Prazo de inscrição");
        assert_eq!(pages[&3], "");
        assert!(split_pages("no headers here").is_empty());
    }

    #[test]
    fn test_render_current() {
        let mut viewer = loaded(3);
        viewer.go_to_page(2);
        assert_eq!(
            viewer.render_current(),
            "--- Página 2 --- (2 de 3)\nPrazo de inscrição"
        );
        viewer.go_to_page(3);
        assert!(viewer.render_current().ends_with("[sem texto nesta página]"));
    }

    #[test]
    fn test_page_count_falls_back_to_headers() {
        assert_eq!(count_pages(b"not a pdf"), None);
        assert_eq!(resolve_page_count(b"not a pdf", DOC), Some(3));
        assert_eq!(resolve_page_count(b"not a pdf", "sem marcadores"), None);
    }
}
