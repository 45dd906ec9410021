//! Chunked HTTP downloader: probe a remote file, split it into byte ranges, fetch
//! the ranges concurrently and assemble them into one output file.

pub mod core;
pub mod plugins;

pub use crate::core::engine::Engine;
pub use crate::core::error::DownloadError;
pub use crate::core::events::EngineEvent;
pub use crate::core::model::{ByteRange, DownloadOptions, DownloadOutcome, DownloadPlan, SinkMode};
pub use crate::plugins::driver::{DriverContext, TransferDriver};
