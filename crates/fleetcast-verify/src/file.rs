use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{Hasher, Result, VerificationError};

/// Read buffer used when streaming files through a hasher.
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Digest a whole file with bounded memory.
pub fn digest_file<H: Hasher>(path: impl AsRef<Path>, mut hasher: H) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let read_err = |source| VerificationError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_err)?;
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Digest `path` and compare it against `expected`.
pub fn verify_file<H: Hasher>(path: impl AsRef<Path>, hasher: H, expected: &[u8]) -> Result<()> {
    let actual = digest_file(path, hasher)?;
    if actual == expected {
        Ok(())
    } else {
        Err(VerificationError::Mismatch {
            expected: expected.to_vec(),
            actual,
        })
    }
}

/// Hex-encoded SHA-256 of a file, the format carried in chunk manifests.
#[cfg(feature = "sha256")]
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    digest_file(path, crate::Sha256Hasher::new()).map(hex::encode)
}

/// Verify a file against a hex-encoded SHA-256 digest.
#[cfg(feature = "sha256")]
pub fn verify_sha256_hex(path: impl AsRef<Path>, expected_hex: &str) -> Result<()> {
    let expected = decode_digest(expected_hex)?;
    verify_file(path, crate::Sha256Hasher::new(), &expected)
}

pub fn decode_digest(hex_digest: &str) -> Result<Vec<u8>> {
    hex::decode(hex_digest.trim()).map_err(|_| VerificationError::InvalidDigest(hex_digest.to_string()))
}

#[cfg(all(test, feature = "sha256"))]
mod tests {
    use super::*;
    use crate::Sha256Hasher;
    use tempfile::tempdir;

    #[test]
    fn test_digest_file_spanning_many_buffers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        let data: Vec<u8> = (0..(STREAM_BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let streamed = digest_file(&path, Sha256Hasher::new()).unwrap();
        assert_eq!(streamed, Sha256Hasher::digest(&data));
    }

    #[test]
    fn test_single_byte_change_is_detected() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("a.bin");
        let rebuilt = dir.path().join("b.bin");
        let mut data = vec![7u8; 4096];
        std::fs::write(&original, &data).unwrap();
        data[2048] ^= 0x01;
        std::fs::write(&rebuilt, &data).unwrap();

        let expected = sha256_file(&original).unwrap();
        let err = verify_sha256_hex(&rebuilt, &expected).unwrap_err();
        assert!(err.is_mismatch());
        verify_sha256_hex(&original, &expected).unwrap();
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.bin");
        let err = sha256_file(&missing).unwrap_err();
        assert!(err.to_string().contains("absent.bin"));
    }

    #[test]
    fn test_decode_digest_rejects_garbage() {
        assert!(matches!(
            decode_digest("not-hex"),
            Err(VerificationError::InvalidDigest(_))
        ));
    }
}
