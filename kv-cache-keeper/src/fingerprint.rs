//! Content fingerprints with a sidecar cache.
//!
//! A fingerprint is the hex SHA-256 of a file, streamed in fixed-size blocks.
//! The first computation is written to `{file}.sha256`; later calls return the
//! sidecar value without reading the file again.
//!
//! The sidecar write is advisory: when it fails the digest is still returned
//! and [`Origin::ComputedUncached`] tells the caller the cache is missing. A
//! present sidecar is trusted as-is. Whoever rewrites a file under an existing
//! name (a same-second save, a backup copy) removes its sidecar first.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read block size for hashing (1 MiB)
const BLOCK_SIZE: usize = 1024 * 1024;

/// Sidecar file suffix
pub const SIDECAR_SUFFIX: &str = ".sha256";

/// Where a fingerprint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Read from an existing sidecar; the file itself was not read.
    Sidecar,
    /// Hashed from the file and cached in a new sidecar.
    Computed,
    /// Hashed from the file; the sidecar could not be written.
    ComputedUncached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Lowercase hex SHA-256
    pub digest: String,
    pub origin: Origin,
}

/// Path of the sidecar belonging to `path`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Fingerprint `path`, using or creating its sidecar.
pub fn fingerprint(path: &Path) -> io::Result<Fingerprint> {
    let sidecar = sidecar_path(path);

    if let Some(digest) = read_sidecar(&sidecar) {
        return Ok(Fingerprint {
            digest,
            origin: Origin::Sidecar,
        });
    }

    let digest = hash_file(path)?;
    let origin = match fs::write(&sidecar, &digest) {
        Ok(()) => Origin::Computed,
        Err(e) => {
            warn!("Could not cache fingerprint for {}: {}", path.display(), e);
            Origin::ComputedUncached
        }
    };

    debug!("Fingerprinted {}: {}", path.display(), digest);
    Ok(Fingerprint { digest, origin })
}

/// Record a known digest for `path` (used when copying a file whose
/// fingerprint is already known). Advisory, like the cache itself.
pub fn store(path: &Path, digest: &str) -> bool {
    match fs::write(sidecar_path(path), digest) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not write fingerprint sidecar for {}: {}", path.display(), e);
            false
        }
    }
}

/// Remove the sidecar of `path`. A missing sidecar counts as removed.
pub fn remove_sidecar(path: &Path) -> io::Result<()> {
    match fs::remove_file(sidecar_path(path)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Stream the file through SHA-256.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn read_sidecar(sidecar: &Path) -> Option<String> {
    let content = fs::read_to_string(sidecar).ok()?;
    let digest = content.trim();
    let well_formed = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
    if well_formed {
        Some(digest.to_ascii_lowercase())
    } else {
        debug!("Ignoring malformed sidecar {}", sidecar.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_hash_known_value() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.bin");
        fs::write(&path, b"hello")?;
        assert_eq!(hash_file(&path)?, HELLO_SHA256);
        Ok(())
    }

    #[test]
    fn test_hash_spans_multiple_blocks() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("big.bin");
        let data = vec![7u8; BLOCK_SIZE * 2 + 13];
        fs::write(&path, &data)?;
        assert_eq!(hash_file(&path)?, hex::encode(Sha256::digest(&data)));
        Ok(())
    }

    #[test]
    fn test_first_call_writes_sidecar() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.bin");
        fs::write(&path, b"hello")?;

        let fp = fingerprint(&path)?;
        assert_eq!(fp.origin, Origin::Computed);
        assert_eq!(fs::read_to_string(sidecar_path(&path))?, HELLO_SHA256);
        Ok(())
    }

    #[test]
    fn test_second_call_uses_sidecar_without_reading_file() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.bin");
        fs::write(&path, b"hello")?;

        let first = fingerprint(&path)?;

        // Changing the content behind the cache's back proves the second
        // call never reads the file.
        fs::write(&path, b"something else")?;
        let second = fingerprint(&path)?;

        assert_eq!(second.origin, Origin::Sidecar);
        assert_eq!(first.digest, second.digest);
        Ok(())
    }

    #[test]
    fn test_malformed_sidecar_is_recomputed() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.bin");
        fs::write(&path, b"hello")?;
        fs::write(sidecar_path(&path), "not a digest")?;

        let fp = fingerprint(&path)?;
        assert_eq!(fp.origin, Origin::Computed);
        assert_eq!(fp.digest, HELLO_SHA256);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(fingerprint(&dir.path().join("gone.bin")).is_err());
    }

    #[test]
    fn test_remove_sidecar_tolerates_absence() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("a.bin");
        remove_sidecar(&path)?;

        fs::write(&path, b"hello")?;
        fingerprint(&path)?;
        remove_sidecar(&path)?;
        assert!(!sidecar_path(&path).exists());
        Ok(())
    }
}
