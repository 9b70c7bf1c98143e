use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, rendered verbatim.
    Text(String),
    /// A page-jump control. `label` is the marker as written in the reply.
    Citation { page: u32, label: String },
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[\s*Página\s*(\d+)(?:\s*,\s*\d+)*\s*\]").expect("citation regex is valid")
    })
}

/// Split `content` into literal text and citations, in order. A multi-page
/// marker links to its first page; empty text between adjacent markers is
/// dropped.
pub fn parse_citations(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut last = 0;

    for caps in citation_regex().captures_iter(content) {
        let Some(marker) = caps.get(0) else { continue };
        literal.push_str(&content[last..marker.start()]);
        last = marker.end();

        match caps[1].parse::<u32>() {
            Ok(page) => {
                if !literal.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Citation {
                    page,
                    label: marker.as_str().to_string(),
                });
            }
            // a page number too large for u32 is not a usable link
            Err(_) => literal.push_str(marker.as_str()),
        }
    }

    literal.push_str(&content[last..]);
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    segments
}

/// Pages cited in `content`, in order of appearance, duplicates kept.
pub fn cited_pages(content: &str) -> Vec<u32> {
    parse_citations(content)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Citation { page, .. } => Some(page),
            Segment::Text(_) => None,
        })
        .collect()
}

/// Render for a terminal: each citation gets a `#k` index the user can pass to
/// the jump command.
pub fn render_with_indices(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut index = 0;
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Citation { label, .. } => {
                index += 1;
                out.push_str(&format!("{}#{}", label, index));
            }
        }
    }
    out
}
