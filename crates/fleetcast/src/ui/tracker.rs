use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;

const BYTES_STYLE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

const COUNT_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

fn style(template: &str) -> ProgressStyle {
    match ProgressStyle::with_template(template) {
        Ok(style) => style.tick_chars(TICK).progress_chars(PB_CHARS),
        Err(_) => ProgressStyle::default_bar(),
    }
}

static BYTES_TEMPLATE: Lazy<ProgressStyle> = Lazy::new(|| style(BYTES_STYLE));

static COUNT_TEMPLATE: Lazy<ProgressStyle> = Lazy::new(|| style(COUNT_STYLE));

#[derive(Debug, Clone, Copy)]
pub enum TrackerKind {
    /// Bytes moved, with throughput and ETA.
    Bytes,
    /// Finished items out of a total.
    Count,
}

pub struct ProgressTracker {
    pub pb: ProgressBar,
}

impl ProgressTracker {
    pub fn new(len: u64, kind: TrackerKind) -> Self {
        let pb = ProgressBar::new(len);
        pb.set_style(match kind {
            TrackerKind::Bytes => BYTES_TEMPLATE.clone(),
            TrackerKind::Count => COUNT_TEMPLATE.clone(),
        });
        Self { pb }
    }

    /// A handle that can be moved into progress callbacks.
    pub fn handle(&self) -> ProgressBar { self.pb.clone() }

    pub fn finish(&self, msg: Option<String>) {
        match msg {
            Some(msg) => self.pb.finish_with_message(msg),
            None => self.pb.finish(),
        }
    }
}
