/// Marker appended when [`truncate_chars`] cuts a string.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Cap `text` at `max_chars` characters, appending [`TRUNCATION_MARKER`] when
/// anything was removed. Always cuts at a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        },
        None => text.to_string(),
    }
}
