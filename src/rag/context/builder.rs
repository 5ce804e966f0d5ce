//! Bounded, ranked context block for the generator

use crate::retrieval::QueryHit;

use super::templates::strip_role_markers;

/// Formats retrieved passages as a numbered list under a character budget
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Render hits as `"{rank}. {text}\n"` in result order.
    ///
    /// The output is at most `max_chars` characters. The entry that would
    /// overflow is cut at the last whitespace that fits (or hard-cut when
    /// there is none) and assembly stops there. No hits gives `""`.
    pub fn assemble(&self, hits: &[QueryHit], max_chars: usize) -> String {
        let mut context = String::new();
        let mut used = 0;

        for (i, hit) in hits.iter().enumerate() {
            let text = strip_role_markers(hit.text());
            let text = text.trim();
            let prefix = format!("{}. ", i + 1);
            let prefix_len = prefix.chars().count();
            let text_len = text.chars().count();
            let entry_len = prefix_len + text_len + 1;

            if used + entry_len <= max_chars {
                context.push_str(&prefix);
                context.push_str(text);
                context.push('\n');
                used += entry_len;
                continue;
            }

            let available = max_chars.saturating_sub(used + prefix_len);
            let cut = cut_at_whitespace(text, available);
            if !cut.is_empty() {
                tracing::debug!(
                    "Context budget reached: entry {} cut from {} to {} chars",
                    i + 1,
                    text_len,
                    cut.chars().count()
                );
                context.push_str(&prefix);
                context.push_str(cut);
            }
            break;
        }

        context
    }
}

/// Longest prefix of `text` with at most `limit` chars, ending at a word boundary if possible
fn cut_at_whitespace(text: &str, limit: usize) -> &str {
    let byte_limit = match text.char_indices().nth(limit) {
        Some((idx, _)) => idx,
        None => return text,
    };
    let head = &text[..byte_limit];

    // Already on a boundary
    if text[byte_limit..].starts_with(char::is_whitespace) {
        return head.trim_end();
    }

    match head.rfind(char::is_whitespace) {
        Some(idx) => head[..idx].trim_end(),
        None => head,
    }
}
