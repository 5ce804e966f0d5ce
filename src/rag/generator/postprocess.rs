//! Turning raw model output into a clean answer

use crate::rag::context::templates::{strip_role_markers, ChatTemplate};

/// Keep only the assistant's reply.
///
/// Removes an echoed prompt (or everything up to the last assistant
/// marker), cuts at the first role marker that follows, strips any stray
/// markers and trims whitespace.
pub fn clean_completion(raw: &str, prompt: &str, template: ChatTemplate) -> String {
    let mut reply = match raw.strip_prefix(prompt) {
        Some(rest) => rest,
        None => {
            let marker = template.assistant_marker();
            match raw.rfind(marker) {
                Some(idx) => &raw[idx + marker.len()..],
                None => raw,
            }
        }
    };

    if let Some(end) = first_marker(reply, template) {
        reply = &reply[..end];
    }

    strip_role_markers(reply).trim().to_string()
}

/// Byte offset of the earliest role marker in `text`
fn first_marker(text: &str, template: ChatTemplate) -> Option<usize> {
    template
        .markers()
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
}
