//! Bounded, user-visible failure messages.

/// Maximum number of characters kept in a persisted error message.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Truncate a message to [`MAX_MESSAGE_CHARS`] characters.
///
/// Counts chars rather than bytes so multi-byte text is never split mid-codepoint.
pub fn bounded_message(message: impl AsRef<str>) -> String {
    let message = message.as_ref().trim();
    match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}
