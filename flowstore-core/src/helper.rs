//! Shared utilities

use sha2::{Digest, Sha256};

/// Compute the hex SHA-256 of a byte slice
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Truncate a string to at most `max_chars` characters, noting the original length
pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", head, total)
    }
}
