//! Staging workspaces and atomic placement for delivered artifacts.
//!
//! Everything that lands on disk during a delivery goes through here:
//! chunk staging directories that clean themselves up unless kept,
//! rename-based promotion of verified files, and the clear-old sweep of a
//! project directory.

mod error;
mod primitives;
mod workspace;

pub use error::{Error, Result};
pub use primitives::{AtomicWriteOptions, atomic_read, atomic_write, clear_dir, ensure_dir, promote};
pub use workspace::Workspace;
