//! Deterministic one-way mapping of source user IDs to short aliases.

use sha2::{Digest as _, Sha256};

/// Length of a full alias in hex characters.
pub const ALIAS_LEN: usize = 12;

/// Hashes source user IDs into stable 12-character aliases.
///
/// The alias is the first 12 hex chars of `SHA-256(user_id || pepper)`.
/// The hash function is fixed: substituting it would orphan every alias
/// already persisted. Truncation collisions are tolerated at forum scale
/// and not detected.
#[derive(Clone)]
pub struct IdentityHasher {
    pepper: [u8; 32],
}

impl IdentityHasher {
    pub fn new(pepper: [u8; 32]) -> Self {
        Self { pepper }
    }

    /// Alias for a source user ID.
    pub fn alias(&self, user_id: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.to_string().as_bytes());
        hasher.update(self.pepper);
        let digest = hasher.finalize();
        hex::encode(digest)[..ALIAS_LEN].to_string()
    }

    /// Alias with an optional staff tag appended: `"{alias[..8]}:{tag}"`.
    ///
    /// The tagged form trades four hash chars for the public tag so the
    /// result still fits the 12-char alias column for short tags.
    pub fn tagged_alias(&self, user_id: u64, tag: Option<&str>) -> String {
        let alias = self.alias(user_id);
        match tag {
            Some(tag) => format!("{}:{}", &alias[..8], tag),
            None => alias,
        }
    }
}

impl std::fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the pepper.
        f.debug_struct("IdentityHasher").finish_non_exhaustive()
    }
}
