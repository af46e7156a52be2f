use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FRONTMATTER_RE: Regex =
        Regex::new(r"(?s)\A---\r?\n(?:.*?\r?\n)??---[ \t]*(?:\r?\n|\z)").unwrap();
}

/// Note body with a leading YAML frontmatter block removed
pub fn strip_frontmatter(content: &str) -> &str {
    match FRONTMATTER_RE.find(content) {
        Some(m) => &content[m.end()..],
        None => content,
    }
}

/// Text handed to the embedding provider for one note
///
/// Title first, then the body without frontmatter, truncated to
/// `max_chars` characters (not bytes).
pub fn embedding_text(title: &str, content: &str, max_chars: usize) -> String {
    let body = strip_frontmatter(content).trim();
    let text = if title.is_empty() {
        body.to_string()
    } else if body.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{body}")
    };

    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}
