//! Content fingerprint gate for index rebuilds.
//!
//! A snapshot's digest decides whether the persisted index can be reused.
//! The stored fingerprint is written only after the index it describes has
//! been fully persisted, so the (fingerprint, index) pair always advances
//! as one generation; a crash mid-rebuild leaves the previous pair intact.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Streaming SHA-256 of a file, hex-encoded.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether the index must be rebuilt for `snapshot`.
///
/// True when the index file is missing, no fingerprint is stored, or the
/// stored digest differs from a fresh digest of the snapshot.
pub fn needs_rebuild(snapshot: &Path, fingerprint_path: &Path, index_path: &Path) -> Result<bool> {
    if !index_path.exists() {
        debug!("No index at {}; rebuild required", index_path.display());
        return Ok(true);
    }
    if !fingerprint_path.exists() {
        debug!(
            "No stored fingerprint at {}; rebuild required",
            fingerprint_path.display()
        );
        return Ok(true);
    }

    let stored = std::fs::read_to_string(fingerprint_path)
        .with_context(|| format!("failed to read fingerprint {}", fingerprint_path.display()))?;
    let fresh = digest_file(snapshot)?;

    Ok(stored.trim() != fresh)
}

/// Record `snapshot`'s digest at `fingerprint_path`.
///
/// Call only once the new index is fully on disk.
pub fn commit(snapshot: &Path, fingerprint_path: &Path) -> Result<()> {
    let digest = digest_file(snapshot)?;
    std::fs::write(fingerprint_path, &digest)
        .with_context(|| format!("failed to write fingerprint {}", fingerprint_path.display()))?;
    info!("Committed snapshot fingerprint {}", &digest[..12]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identical_bytes_same_digest() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.csv");
        let b = temp.path().join("b.csv");
        std::fs::write(&a, "id,title\n1,Developer\n").unwrap();
        std::fs::write(&b, "id,title\n1,Developer\n").unwrap();

        assert_eq!(digest_file(&a).unwrap(), digest_file(&b).unwrap());
    }

    #[test]
    fn test_single_byte_change_different_digest() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.csv");
        let b = temp.path().join("b.csv");
        std::fs::write(&a, "id,title\n1,Developer\n").unwrap();
        std::fs::write(&b, "id,title\n2,Developer\n").unwrap();

        assert_ne!(digest_file(&a).unwrap(), digest_file(&b).unwrap());
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.csv");
        std::fs::write(&a, "payload").unwrap();

        let digest = digest_file(&a).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_rebuild_required_without_index() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("snap.csv");
        std::fs::write(&snapshot, "data").unwrap();

        let needs = needs_rebuild(
            &snapshot,
            &temp.path().join("fp"),
            &temp.path().join("missing.db"),
        )
        .unwrap();
        assert!(needs);
    }

    #[test]
    fn test_rebuild_required_without_fingerprint() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("snap.csv");
        let index = temp.path().join("index.db");
        std::fs::write(&snapshot, "data").unwrap();
        std::fs::write(&index, "blob").unwrap();

        let needs = needs_rebuild(&snapshot, &temp.path().join("fp"), &index).unwrap();
        assert!(needs);
    }

    #[test]
    fn test_commit_then_unchanged_means_no_rebuild() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("snap.csv");
        let fingerprint = temp.path().join("fp");
        let index = temp.path().join("index.db");
        std::fs::write(&snapshot, "data").unwrap();
        std::fs::write(&index, "blob").unwrap();

        commit(&snapshot, &fingerprint).unwrap();
        assert!(!needs_rebuild(&snapshot, &fingerprint, &index).unwrap());
    }

    #[test]
    fn test_modified_snapshot_forces_rebuild() {
        let temp = tempdir().unwrap();
        let snapshot = temp.path().join("snap.csv");
        let fingerprint = temp.path().join("fp");
        let index = temp.path().join("index.db");
        std::fs::write(&snapshot, "data v1").unwrap();
        std::fs::write(&index, "blob").unwrap();

        commit(&snapshot, &fingerprint).unwrap();
        std::fs::write(&snapshot, "data v2").unwrap();

        assert!(needs_rebuild(&snapshot, &fingerprint, &index).unwrap());
    }
}
