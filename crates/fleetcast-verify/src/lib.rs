//! Streaming whole-file digests for delivered artifacts.
//!
//! The same digest is computed on the control node before a transfer and on
//! the target after reconstruction; delivery only succeeds when both agree.
//! Files are always streamed through a fixed-size buffer, never loaded whole.
//!
//! # Example
//!
//! ```
//! use fleetcast_verify::{VerifiedReader, Sha256Hasher};
//!
//! let data = b"hello world";
//! let expected = Sha256Hasher::digest(b"hello world");
//!
//! let mut reader = VerifiedReader::new(&data[..], Sha256Hasher::new());
//! std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
//!
//! reader.finish(&expected).unwrap();
//! ```

pub use self::error::{Result, VerificationError};
pub use self::file::{STREAM_BUFFER_SIZE, decode_digest, digest_file, verify_file};
pub use self::hasher::Hasher;
pub use self::reader::VerifiedReader;

#[cfg(feature = "sha256")]
pub use self::file::{sha256_file, verify_sha256_hex};
#[cfg(feature = "sha256")]
pub use self::hasher::Sha256Hasher;

mod error;
mod file;
mod hasher;
mod reader;
