//! Transport-specific heuristics for streamed content increments.
//!
//! These filters compensate for observed quirks of the agent transport:
//! first chunks that arrive clipped, and occasional full-message resends in
//! the middle of a delta stream. They are load-bearing for correctness
//! against that transport, kept as standalone predicates so each can be
//! tested on its own.

/// Normalize literal escaped newline sequences (`\n` arriving as two
/// characters) into real line breaks.
pub fn clean_streaming_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    text.replace("\\n\\n", "\n\n").replace("\\n", "\n")
}

/// A first reasoning chunk whose leading character is punctuation is
/// almost certainly a clipped or out-of-order delivery.
pub fn starts_with_stray_punctuation(chunk: &str) -> bool {
    matches!(
        chunk.trim().chars().next(),
        Some(',' | '.' | '-' | '!' | '?')
    )
}

/// A first content chunk opening with whitespace is the same truncation
/// symptom on the assistant side.
pub fn starts_with_whitespace(chunk: &str) -> bool {
    chunk.chars().next().is_some_and(char::is_whitespace)
}

/// Some transports occasionally resend the complete message instead of a
/// delta. A long chunk containing both `?` and `!` landing on top of
/// existing content is treated as such a resend and replaces rather than
/// appends.
pub fn looks_like_full_resend(chunk: &str, existing: &str) -> bool {
    !existing.is_empty()
        && chunk.chars().count() > 50
        && chunk.contains('?')
        && chunk.contains('!')
}
