/// Lossy UTF-8 view of a captured stream, keeping at most the last
/// `max_bytes`. Whitespace-only output is treated as absent.
pub fn normalize_stream(bytes: &[u8], max_bytes: usize) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let normalized = if bytes.len() > max_bytes {
        &bytes[(bytes.len() - max_bytes)..]
    } else {
        bytes
    };

    let text = String::from_utf8_lossy(normalized).to_string();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
