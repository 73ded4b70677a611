// Utility functions

pub mod logger;
pub mod retry;

pub use logger::*;
pub use retry::*;

/// Clip `s` to at most `max` characters without splitting a UTF-8 sequence
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
