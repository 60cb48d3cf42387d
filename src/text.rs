//! Text clean-up shared by console responses and log messages.

/// Trims trailing whitespace and folds `\r\n`, `\n\r`, `\n` and `\r` into a
/// single `\n`.
pub fn normalize(text: &str) -> String {
    let trimmed = text.trim_end();
    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                out.push('\n');
            }
            '\n' => {
                chars.next_if_eq(&'\r');
                out.push('\n');
            }
            c => out.push(c),
        }
    }
    out
}

/// Decodes a wire body. Bytes that are not valid UTF-8 give an empty string
/// so one bad body never ends a session.
pub fn decode_body(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => normalize(text),
        Err(err) => {
            tracing::warn!("dropping body that is not valid UTF-8: {err}");
            String::new()
        }
    }
}
