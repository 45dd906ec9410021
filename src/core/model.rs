use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Inclusive byte interval `[start, end]` of the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "byte range {start}-{end} is inverted");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// True when this range is the whole resource `[0, total - 1]`.
    pub fn covers_whole(&self, total: u64) -> bool {
        total > 0 && self.start == 0 && self.end == total - 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Ordered chunk ranges, one per chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub total_length: u64,
    pub ranges: Vec<ByteRange>,
}

impl DownloadPlan {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, ByteRange)> + '_ {
        self.ranges.iter().copied().enumerate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentResult {
    pub index: usize,
    pub range: ByteRange,
    pub bytes_written: u64,
}

/// What the probe learned about the remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    pub content_length: Option<u64>,
    pub accepts_ranges: bool,
    pub content_type: Option<String>,
}

/// Where fetched segments land before the destination is finalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// One `chunk_<index>.tmp` per segment, concatenated afterwards.
    #[default]
    TempFiles,
    /// A single pre-sized staging file written at each segment's offset.
    InPlace,
}

impl FromStr for SinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temp-files" | "temp" | "tmp" => Ok(Self::TempFiles),
            "in-place" | "inplace" | "offset" => Ok(Self::InPlace),
            other => Err(format!("unknown sink mode: {other} (expected temp-files or in-place)")),
        }
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempFiles => f.write_str("temp-files"),
            Self::InPlace => f.write_str("in-place"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub num_chunks: u32,
    /// Upper bound on concurrently running segment fetches.
    pub max_workers: usize,
    /// Split each segment into requests of at most this many bytes.
    pub sub_chunk_size: Option<u64>,
    pub sub_parallelism: usize,
    pub mode: SinkMode,
    /// Parent of the per-download chunk directory. Defaults to the destination's directory.
    pub temp_dir: Option<PathBuf>,
    pub report_interval: Duration,
}

pub const DEFAULT_NUM_CHUNKS: u32 = 10;
pub const DEFAULT_MAX_WORKERS: usize = 32;
pub const DEFAULT_SUB_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            num_chunks: DEFAULT_NUM_CHUNKS,
            max_workers: DEFAULT_MAX_WORKERS,
            sub_chunk_size: Some(DEFAULT_SUB_CHUNK_SIZE),
            sub_parallelism: 4,
            mode: SinkMode::TempFiles,
            temp_dir: None,
            report_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: usize,
    pub elapsed: Duration,
    pub content_type: Option<String>,
}
