//! Bounded previews of message content for log lines.

use std::borrow::Cow;

/// Default number of characters kept in a log preview
pub const DEFAULT_PREVIEW_LEN: usize = 200;

/// Truncate `text` to at most `max_chars` characters, marking the cut with `...`
pub fn preview(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}
