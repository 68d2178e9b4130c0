#![forbid(unsafe_code)]

//! Title-to-filename normalization and the matching Content-Disposition
//! header value.

/// Longest sanitized name, counted in codepoints so multi-byte titles are
/// never split mid-character.
const MAX_NAME_CHARS: usize = 200;

/// Substituted when sanitizing leaves nothing usable.
const FALLBACK_NAME: &str = "video";

/// Makes an arbitrary title safe to use as a filesystem entry and inside an
/// HTTP header. Path separators and other unsafe punctuation become `-`,
/// control characters are dropped, surrounding spaces and periods are
/// trimmed, and the result is capped at 200 codepoints. Never returns an
/// empty string, and applying it twice changes nothing.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '-',
            other => other,
        })
        .filter(|c| !c.is_control())
        .collect();

    let trimmed = cleaned.trim_matches([' ', '.']);
    let capped: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    // The cut can expose a new trailing space or period; trim again so the
    // function stays idempotent.
    let capped = capped.trim_end_matches([' ', '.']);

    if capped.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        capped.to_string()
    }
}

/// Content-Disposition value advertising `name` as a UTF-8 filename per
/// RFC 5987 (`filename*=UTF-8''…`). Everything outside the unreserved set is
/// percent-encoded, a safe superset of attr-char.
pub fn content_disposition(name: &str) -> String {
    format!("attachment; filename*=UTF-8''{}", urlencoding::encode(name))
}
