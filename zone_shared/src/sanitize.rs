//! Sanitization of untrusted text that gets replayed to other clients.
//!
//! Nothing here rejects input. Text is stripped and truncated instead.

/// Maximum visible characters in a display name.
pub const MAX_DISPLAY_NAME_CHARS: usize = 20;

/// Maximum characters in a model key.
pub const MAX_MODEL_KEY_CHARS: usize = 32;

/// Strips markup and control characters, then truncates to
/// [`MAX_DISPLAY_NAME_CHARS`].
///
/// Anything between `<` and the next `>` is removed together with the
/// brackets. An unclosed `<` drops the rest of the input. A stray `>` is
/// dropped on its own.
pub fn sanitize_display_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_DISPLAY_NAME_CHARS * 4));
    let mut in_tag = false;

    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if in_tag => {}
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out.trim().chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}

fn is_model_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Drops every character outside `[A-Za-z0-9_-]` and truncates to
/// [`MAX_MODEL_KEY_CHARS`].
pub fn sanitize_model_key(raw: &str) -> String {
    raw.chars()
        .filter(|&c| is_model_key_char(c))
        .take(MAX_MODEL_KEY_CHARS)
        .collect()
}

/// True when `key` is safe to use as an asset file stem.
pub fn is_valid_model_key(key: &str) -> bool {
    !key.is_empty() && key.chars().count() <= MAX_MODEL_KEY_CHARS && key.chars().all(is_model_key_char)
}
