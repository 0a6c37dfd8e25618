// ============== Text Helpers ==============

/// Shorten `s` to `max_len` chars with a trailing ellipsis (log previews).
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Split `text` into chunks of at most `limit` chars.
///
/// Prefers to break after a newline, then after a space, and only cuts
/// mid-word when a single line has no usable break point.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        // Byte index of the first char past the limit.
        let hard = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard];

        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .filter(|i| *i > 0)
            .unwrap_or(hard);

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Header line used by the `interact` tool: `[project | session]`.
pub fn session_header(project: &str, session: &str, body: Option<&str>) -> String {
    format!("[{project} | {session}]\n{}", body.unwrap_or(""))
}
