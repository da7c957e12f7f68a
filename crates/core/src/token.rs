//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! Counting is by Unicode scalar values so the result does not depend on
//! the byte encoding of the text. An 8-character string is exactly 2 tokens.

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Longest prefix of `text` whose estimate fits in `max_tokens`.
pub fn clip_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
