use std::io::{self, Read};

use crate::{Hasher, Result, VerificationError};

/// Streaming reader that hashes data as it passes through.
///
/// Copying through it and calling [`finish`](VerifiedReader::finish) verifies
/// a single-shot transfer without reading the file twice.
pub struct VerifiedReader<R, H> {
    reader: R,
    hasher: H,
    bytes:  u64,
}

impl<R, H> VerifiedReader<R, H> {
    pub fn new(reader: R, hasher: H) -> Self {
        Self {
            reader,
            hasher,
            bytes: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 { self.bytes }
}

impl<R: Read, H: Hasher> Read for VerifiedReader<R, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes += n as u64;
        }
        Ok(n)
    }
}

impl<R: Read, H: Hasher> VerifiedReader<R, H> {
    /// Finalize and compare against the expected digest.
    pub fn finish(self, expected: &[u8]) -> Result<()> {
        let actual = self.hasher.finalize();
        if actual == expected {
            Ok(())
        } else {
            Err(VerificationError::Mismatch {
                expected: expected.to_vec(),
                actual,
            })
        }
    }
}

#[cfg(all(test, feature = "sha256"))]
mod tests {
    use super::*;
    use crate::Sha256Hasher;
    use std::io::Cursor;

    #[test]
    fn test_verified_reader_success() {
        let data = b"test data for verification";
        let expected = Sha256Hasher::digest(data);

        let mut verified = VerifiedReader::new(Cursor::new(data), Sha256Hasher::new());
        let mut sink = Vec::new();
        io::copy(&mut verified, &mut sink).unwrap();

        assert_eq!(sink, data);
        assert_eq!(verified.bytes_read(), data.len() as u64);
        verified.finish(&expected).unwrap();
    }

    #[test]
    fn test_verified_reader_hash_mismatch() {
        let mut verified = VerifiedReader::new(Cursor::new(b"test data"), Sha256Hasher::new());
        io::copy(&mut verified, &mut io::sink()).unwrap();

        let result = verified.finish(&[0; 32]);
        match result {
            Err(VerificationError::Mismatch { expected, actual }) => {
                assert_eq!(expected, vec![0; 32]);
                assert_ne!(actual, vec![0; 32]);
            }
            other => panic!("expected Mismatch, got {other:?}"),
        }
    }
}
