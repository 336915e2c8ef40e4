//! Cleanup of raw completions into Mermaid markup.

use diagai_core::DiagramStyle;

pub const FRAME_DELIMITER: &str = "---FRAME---";

/// Turn escaped `\n` sequences into real newlines and trim.
pub fn normalize(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

const FENCE: &str = "```";

/// Remove Markdown code fences (with or without a language tag).
///
/// A fence that ends the text with something before it closes a block whose
/// opening was lost, so the text before it is kept. Any other fence opens a
/// block: its tag line is skipped and the body runs to the next fence.
pub fn strip_fences(raw: &str) -> String {
    let text = raw.trim();
    let Some(first) = text.find(FENCE) else {
        return text.to_string();
    };
    let before = text[..first].trim();
    let after = &text[first + FENCE.len()..];
    if !before.is_empty() && after.trim().is_empty() {
        return before.to_string();
    }
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
    let body = &after[body_start..];
    let body = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

/// The inside of a completion that is exactly one fenced block, so that
/// delimiters inside it survive.
fn unwrap_block(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(FENCE)?.strip_suffix(FENCE)?;
    if inner.contains(FENCE) {
        return None;
    }
    let body_start = inner.find('\n')? + 1;
    Some(&inner[body_start..])
}

/// Everything a single-diagram completion needs before validation.
pub fn clean(raw: &str) -> String {
    strip_fences(&normalize(raw))
}

/// Split a multi-frame completion on the delimiter. Segments are cleaned
/// individually; empty ones are dropped.
pub fn split_frames(raw: &str) -> Vec<String> {
    let text = normalize(raw);
    unwrap_block(&text)
        .unwrap_or(&text)
        .split(FRAME_DELIMITER)
        .map(strip_fences)
        .map(|f| f.trim_matches('`').trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Prepend the style's declaration when the markup lacks one.
pub fn ensure_header(markup: &str, style: DiagramStyle) -> String {
    if style.is_declared_by(markup) {
        markup.to_string()
    } else {
        format!("{}\n{}", style.header(), markup)
    }
}
