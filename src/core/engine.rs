use crate::core::assembler::{chunk_file_path, merge_chunk_files};
use crate::core::error::DownloadError;
use crate::core::events::EngineEvent;
use crate::core::fetcher::{fetch_segment, FetchRequest, FetchTuning, SegmentSink};
use crate::core::model::*;
use crate::core::planner::plan_ranges;
use crate::core::progress::{ProgressAggregator, ProgressReporter};
use crate::core::sink::SharedFileWriter;
use crate::plugins::driver::{DriverContext, TransferDriver};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Drives chunked downloads. Cheap to clone; every `download` call owns its own
/// progress state, temp directory and cancellation scope.
#[derive(Clone)]
pub struct Engine {
    driver: Arc<dyn TransferDriver>,
    options: DownloadOptions,
    driver_ctx: Arc<DriverContext>,
    event_tx: broadcast::Sender<EngineEvent>,
}

enum SinkLayout {
    /// Every segment writes into the staging file at its own offset.
    Shared(Arc<SharedFileWriter>),
    /// Every segment owns `chunk_<index>.tmp` in this directory.
    PerChunk(PathBuf),
}

impl SinkLayout {
    async fn sink_for(&self, index: usize, range: ByteRange) -> Result<SegmentSink, DownloadError> {
        match self {
            Self::Shared(writer) => Ok(SegmentSink { writer: writer.clone(), base_offset: range.start }),
            Self::PerChunk(dir) => {
                let writer = SharedFileWriter::create(&chunk_file_path(dir, index), Some(range.len()))
                    .await
                    .map_err(|e| e.in_segment(index, range))?;
                Ok(SegmentSink { writer: Arc::new(writer), base_offset: 0 })
            }
        }
    }
}

/// Files a download may leave behind, removed when it fails.
struct Scratch {
    staging: PathBuf,
    chunk_dir: Option<PathBuf>,
}

impl Engine {
    pub fn new(driver: Arc<dyn TransferDriver>, options: DownloadOptions, driver_ctx: DriverContext) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self { driver, options, driver_ctx: Arc::new(driver_ctx), event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Download `url` into `dest`. On failure nothing is left at `dest` (an existing
    /// file there is untouched) and all temporary files are removed. Missing parent
    /// directories of `dest` are created.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let started = Instant::now();
        if let Err(e) = self.validate(dest).await {
            let _ = self.event_tx.send(EngineEvent::Failed { message: e.to_string() });
            return Err(e);
        }

        let mut scratch = Scratch { staging: staging_path(dest, Uuid::new_v4()), chunk_dir: None };
        let result = self.run(url, dest, &cancel, &mut scratch, started).await;

        match result {
            Ok(outcome) => {
                tracing::info!(url, path = %dest.display(), bytes = outcome.bytes, elapsed = ?outcome.elapsed, "download finished");
                let _ = self.event_tx.send(EngineEvent::Finished {
                    path: outcome.path.clone(),
                    bytes: outcome.bytes,
                    elapsed: outcome.elapsed,
                });
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(url, error = %e, cause = %e.cause(), "download failed");
                cleanup(&scratch).await;
                let message = match &e {
                    DownloadError::Segment { .. } => format!("{}: {}", e, e.cause()),
                    _ => e.to_string(),
                };
                let _ = self.event_tx.send(EngineEvent::Failed { message });
                Err(e)
            }
        }
    }

    async fn validate(&self, dest: &Path) -> Result<(), DownloadError> {
        if self.options.num_chunks == 0 {
            return Err(DownloadError::InvalidInput("chunk count must be at least 1".to_string()));
        }
        if dest.file_name().is_none() {
            return Err(DownloadError::InvalidInput(format!("destination {} has no file name", dest.display())));
        }
        if let Ok(meta) = tokio::fs::metadata(dest).await {
            if meta.is_dir() {
                return Err(DownloadError::InvalidInput(format!("destination {} is a directory", dest.display())));
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        scratch: &mut Scratch,
        started: Instant,
    ) -> Result<DownloadOutcome, DownloadError> {
        let info = self.probe(url).await?;
        let total = info.content_length.unwrap_or_default();

        let plan = plan_ranges(total, self.options.num_chunks)?;
        let workers = plan.len().min(self.options.max_workers.max(1));
        tracing::info!(url, total, chunks = plan.len(), workers, mode = %self.options.mode, "planned download");
        let _ = self.event_tx.send(EngineEvent::Planned { chunks: plan.len(), workers, mode: self.options.mode });

        // without range support a single chunk must stay a single whole-file request
        let tuning = FetchTuning {
            sub_chunk_size: if info.accepts_ranges { self.options.sub_chunk_size.filter(|s| *s > 0) } else { None },
            sub_parallelism: self.options.sub_parallelism,
        };

        let progress = Arc::new(ProgressAggregator::new(total));
        let reporter = ProgressReporter::spawn(progress.clone(), self.options.report_interval, self.event_tx.clone());

        let fetched = self.fetch_all(url, dest, &plan, workers, tuning, &progress, cancel, scratch).await;
        reporter.stop().await;
        let results = fetched?;

        let bytes: u64 = results.iter().map(|r| r.bytes_written).sum();
        if bytes != total {
            return Err(DownloadError::Internal(format!("fetched {} bytes, expected {}", bytes, total)));
        }

        if let Some(dir) = scratch.chunk_dir.clone() {
            let parts: Vec<PathBuf> = (0..plan.len()).map(|i| chunk_file_path(&dir, i)).collect();
            let _ = self.event_tx.send(EngineEvent::Assembling { parts: parts.len() });
            merge_chunk_files(&parts, &scratch.staging).await?;
            remove_dir(&dir).await;
            scratch.chunk_dir = None;
        }

        finalize(&scratch.staging, dest).await?;

        Ok(DownloadOutcome {
            url: url.to_string(),
            path: dest.to_path_buf(),
            bytes,
            chunks: plan.len(),
            elapsed: started.elapsed(),
            content_type: info.content_type,
        })
    }

    async fn probe(&self, url: &str) -> Result<RemoteInfo, DownloadError> {
        let info = match self.driver.probe(url, &self.driver_ctx).await {
            Ok(i) => i,
            Err(e @ DownloadError::ProbeFailed(_)) => return Err(e),
            Err(e) => return Err(DownloadError::ProbeFailed(format!("{}: {}", url, e))),
        };
        tracing::debug!(url, driver = self.driver.name(), ?info, "probed");

        let total = match info.content_length {
            Some(n) if n > 0 => n,
            Some(_) => return Err(DownloadError::ProbeFailed(format!("{}: remote length is zero", url))),
            None => return Err(DownloadError::ProbeFailed(format!("{}: remote length unknown", url))),
        };
        if !info.accepts_ranges && self.options.num_chunks > 1 {
            return Err(DownloadError::ProbeFailed(format!(
                "{}: server does not advertise byte range support",
                url
            )));
        }

        let _ = self.event_tx.send(EngineEvent::Probed {
            url: url.to_string(),
            total,
            accepts_ranges: info.accepts_ranges,
            content_type: info.content_type.clone(),
        });
        Ok(info)
    }

    /// Worker pool over the plan. Returns results ordered by chunk index; on the first
    /// failure cancels and drains everything still running.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_all(
        &self,
        url: &str,
        dest: &Path,
        plan: &DownloadPlan,
        workers: usize,
        tuning: FetchTuning,
        progress: &Arc<ProgressAggregator>,
        cancel: &CancellationToken,
        scratch: &mut Scratch,
    ) -> Result<Vec<SegmentResult>, DownloadError> {
        // child token: aborting this download never cancels the caller's token
        let cancel = cancel.child_token();

        // the staging file lives next to `dest` whatever the sink mode
        if let Some(parent) = scratch.staging.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::fs_path("create dir", parent, e))?;
        }

        let layout = match self.options.mode {
            SinkMode::InPlace => {
                let writer = SharedFileWriter::create(&scratch.staging, Some(plan.total_length)).await?;
                SinkLayout::Shared(Arc::new(writer))
            }
            SinkMode::TempFiles => {
                let dir = chunk_dir(dest, self.options.temp_dir.as_deref());
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| DownloadError::fs_path("create dir", &dir, e))?;
                scratch.chunk_dir = Some(dir.clone());
                SinkLayout::PerChunk(dir)
            }
        };

        let mut queue: VecDeque<(usize, ByteRange)> = plan.iter().collect();
        let mut join_set: JoinSet<Result<SegmentResult, DownloadError>> = JoinSet::new();
        let mut results: Vec<Option<SegmentResult>> = vec![None; plan.len()];
        let mut completed = 0usize;
        let mut first_err: Option<DownloadError> = None;

        while !queue.is_empty() || !join_set.is_empty() {
            while first_err.is_none() && join_set.len() < workers {
                let Some((index, range)) = queue.pop_front() else { break };
                if cancel.is_cancelled() {
                    first_err = Some(DownloadError::Cancelled);
                    break;
                }

                let sink = match layout.sink_for(index, range).await {
                    Ok(sink) => sink,
                    Err(e) => {
                        first_err = Some(e);
                        break;
                    }
                };

                let _ = self.event_tx.send(EngineEvent::SegmentStarted { index, range });
                join_set.spawn(fetch_segment(FetchRequest {
                    driver: self.driver.clone(),
                    ctx: self.driver_ctx.clone(),
                    url: url.to_string(),
                    index,
                    range,
                    total_length: plan.total_length,
                    sink,
                    progress: progress.clone(),
                    cancel: cancel.clone(),
                    tuning,
                }));
            }

            if first_err.is_some() {
                queue.clear();
                cancel.cancel();
                join_set.shutdown().await;
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    first_err = Some(DownloadError::Cancelled);
                    continue;
                }
                j = join_set.join_next() => j,
            };

            match joined {
                Some(Ok(Ok(r))) => {
                    completed += 1;
                    let _ = self.event_tx.send(EngineEvent::SegmentDone {
                        index: r.index,
                        bytes: r.bytes_written,
                        completed,
                        total: plan.len(),
                    });
                    results[r.index] = Some(r);
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(error = %e, cause = %e.cause(), "segment failed, cancelling remaining chunks");
                    first_err = Some(e);
                }
                Some(Err(e)) => {
                    first_err = Some(DownloadError::Internal(format!("segment task ended abnormally: {}", e)));
                }
                None => break,
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.ok_or_else(|| DownloadError::Internal(format!("chunk {} produced no result", i))))
            .collect()
    }
}

/// Hidden `.<name>.<id>.partial` beside `dest`, renamed onto it only after everything
/// succeeded. The id keeps it clear of user files and of concurrent downloads.
pub fn staging_path(dest: &Path, id: Uuid) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.partial", name, id.simple()))
}

fn chunk_dir(dest: &Path, temp_dir: Option<&Path>) -> PathBuf {
    let parent = temp_dir
        .map(Path::to_path_buf)
        .or_else(|| dest.parent().map(Path::to_path_buf))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    parent.join(format!(".{}.{}.chunks", name, Uuid::new_v4().simple()))
}

// rename replaces an existing `dest` in one step; a failed rename leaves it intact
async fn finalize(staging: &Path, dest: &Path) -> Result<(), DownloadError> {
    tokio::fs::rename(staging, dest)
        .await
        .map_err(|e| DownloadError::fs(format!("rename {} -> {}", staging.display(), dest.display()), e))
}

async fn cleanup(scratch: &Scratch) {
    if let Some(dir) = &scratch.chunk_dir {
        remove_dir(dir).await;
    }
    match tokio::fs::remove_file(&scratch.staging).await {
        Ok(()) => tracing::debug!(path = %scratch.staging.display(), "removed incomplete staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %scratch.staging.display(), error = %e, "could not remove staging file"),
    }
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), error = %e, "could not remove chunk directory"),
    }
}
