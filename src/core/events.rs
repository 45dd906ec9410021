use crate::core::model::{ByteRange, SinkMode};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Probed { url: String, total: u64, accepts_ranges: bool, content_type: Option<String> },
    Planned { chunks: usize, workers: usize, mode: SinkMode },
    SegmentStarted { index: usize, range: ByteRange },
    SegmentDone { index: usize, bytes: u64, completed: usize, total: usize },
    Progress {
        downloaded: u64,
        total: u64,
        percent: f64,
        speed_bps: u64,
        eta: Option<Duration>,
    },
    Assembling { parts: usize },
    Finished { path: PathBuf, bytes: u64, elapsed: Duration },
    Failed { message: String },
}
