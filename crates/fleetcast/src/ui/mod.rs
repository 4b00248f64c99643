mod table;
mod tracker;

pub use table::{FormatConfig, Formatter, status_rows};
pub use tracker::{ProgressTracker, TrackerKind};
