//! Artefact store trait

use crate::domain::{ArtefactRef, ArtefactRole};
use crate::error::Result;

/// Append-only persistence keyed by `(run_id, role)`.
///
/// Implementations must be safe to share across concurrently executing runs.
pub trait ArtefactStore: Send + Sync {
    /// Write a new artefact. Fails with `StorageWrite` if the role already
    /// exists for the run.
    fn put(&self, run_id: &str, role: ArtefactRole, payload: &[u8]) -> Result<ArtefactRef> {
        self.put_named(run_id, role, None, payload)
    }

    /// Write a new artefact under an explicit file name (raw uploads keep
    /// their original name).
    fn put_named(&self, run_id: &str, role: ArtefactRole, file_name: Option<&str>, payload: &[u8]) -> Result<ArtefactRef>;

    /// Read an artefact's payload. `NotFound` when absent.
    fn get(&self, run_id: &str, role: ArtefactRole) -> Result<Vec<u8>>;

    /// All artefacts of a run, in write order
    fn list(&self, run_id: &str) -> Result<Vec<ArtefactRef>>;

    /// Run ids known to the store, oldest first
    fn list_runs(&self) -> Result<Vec<String>>;

    fn contains(&self, run_id: &str, role: ArtefactRole) -> Result<bool> {
        Ok(self.list(run_id)?.iter().any(|r| r.role == role))
    }
}

/// SHA-256 of a payload, hex encoded
pub fn digest(payload: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let d = digest(b"hello");
        assert_eq!(d.len(), 64);
        assert_eq!(d, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }
}
