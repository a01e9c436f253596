//! Content fingerprinting for change detection.
//!
//! A note's fingerprint is a digest of its content only. Title, folder,
//! archived flag, and ordering position are deliberately excluded so that
//! cosmetic changes (e.g. renaming a note) are never misclassified as
//! content conflicts during merge.

use sha2::{Digest, Sha256};

/// Compute the content fingerprint for a note body.
///
/// Returns the lowercase hex SHA-256 of the content bytes. Two notes with
/// equal fingerprints are content-equivalent regardless of any metadata
/// differences.
pub fn content_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
