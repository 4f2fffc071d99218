//! Storage class decision

use crate::storage::types::StorageClass;

/// Map a content length to its target storage class.
///
/// The boundary is closed on the external side: a length equal to the
/// threshold is stored externally.
pub fn decide(content_length: usize, threshold: usize) -> StorageClass {
    if content_length >= threshold {
        StorageClass::External
    } else {
        StorageClass::Internal
    }
}

/// Length of `content` as measured against the threshold.
///
/// Counts Unicode scalar values, not UTF-16 code units: a character outside
/// the Basic Multilingual Plane (most emoji) counts once here but twice in a
/// JavaScript `string.length`, so such content may classify differently
/// right at the threshold.
pub fn content_length(content: &str) -> usize {
    content.chars().count()
}
