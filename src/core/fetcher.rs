use crate::core::error::DownloadError;
use crate::core::model::{ByteRange, SegmentResult};
use crate::core::planner::split_range;
use crate::core::progress::{ProgressAggregator, RangeProgress};
use crate::core::sink::SharedFileWriter;
use crate::plugins::driver::{DriverContext, TransferDriver};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use std::io;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct FetchTuning {
    /// Largest single request inside a segment; `None` fetches the segment in one request.
    pub sub_chunk_size: Option<u64>,
    pub sub_parallelism: usize,
}

/// Region of a file that receives one segment: remote byte `range.start` lands at `base_offset`.
#[derive(Clone)]
pub struct SegmentSink {
    pub writer: Arc<SharedFileWriter>,
    pub base_offset: u64,
}

pub struct FetchRequest {
    pub driver: Arc<dyn TransferDriver>,
    pub ctx: Arc<DriverContext>,
    pub url: String,
    pub index: usize,
    pub range: ByteRange,
    pub total_length: u64,
    pub sink: SegmentSink,
    pub progress: Arc<ProgressAggregator>,
    pub cancel: CancellationToken,
    pub tuning: FetchTuning,
}

/// Fetch one planned segment into its sink. Errors carry the chunk index and range.
pub async fn fetch_segment(req: FetchRequest) -> Result<SegmentResult, DownloadError> {
    let (index, range) = (req.index, req.range);

    let pieces = match req.tuning.sub_chunk_size {
        Some(max) if max < range.len() => split_range(range, max),
        _ => vec![range],
    };
    tracing::debug!(chunk = index, %range, pieces = pieces.len(), "fetching segment");

    let written = stream::iter(pieces)
        .map(|piece| fetch_with_retry(&req, piece))
        .buffer_unordered(req.tuning.sub_parallelism.max(1))
        .try_fold(0u64, |acc, n| async move { Ok(acc + n) })
        .await
        .map_err(|e| e.in_segment(index, range))?;

    req.sink.writer.flush().await.map_err(|e| e.in_segment(index, range))?;

    tracing::debug!(chunk = index, %range, written, "segment complete");
    Ok(SegmentResult { index, range, bytes_written: written })
}

async fn fetch_with_retry(req: &FetchRequest, piece: ByteRange) -> Result<u64, DownloadError> {
    let mut progress = RangeProgress::new(&req.progress);
    let mut attempt = 0u32;
    loop {
        match fetch_range_once(req, piece, &mut progress).await {
            Ok(n) => return Ok(n),
            Err(e) if e.is_retryable() && attempt < req.ctx.retries && !req.cancel.is_cancelled() => {
                let delay = backoff_delay(req.ctx.retry_backoff_ms, attempt);
                tracing::warn!(
                    chunk = req.index,
                    range = %piece,
                    attempt = attempt + 1,
                    retries = req.ctx.retries,
                    error = %e,
                    "range fetch failed, retrying in {:?}",
                    delay
                );
                tokio::select! {
                    biased;
                    _ = req.cancel.cancelled() => return Err(DownloadError::Cancelled),
                    _ = sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_range_once(
    req: &FetchRequest,
    piece: ByteRange,
    progress: &mut RangeProgress<'_>,
) -> Result<u64, DownloadError> {
    if req.cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let resp = tokio::select! {
        biased;
        _ = req.cancel.cancelled() => return Err(DownloadError::Cancelled),
        r = req.driver.open_range(&req.url, &req.ctx, piece) => r?,
    };
    check_response(resp.status, resp.content_range.as_deref(), piece, req.total_length)?;

    let mut body = resp.body;
    let expected = piece.len();
    let offset = req.sink.base_offset + (piece.start - req.range.start);
    let read_timeout = Duration::from_secs(req.ctx.timeout_secs);
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = req.cancel.cancelled() => return Err(DownloadError::Cancelled),
            r = tokio::time::timeout(read_timeout, body.next()) => {
                r.map_err(|e| DownloadError::network(format!("read range {}: timed out", piece), e))?
            }
        };
        let Some(data) = next else { break };
        let data = data?;

        let len = data.len() as u64;
        if written + len > expected {
            return Err(protocol_error(
                io::ErrorKind::InvalidData,
                format!("range {}: server sent more than {} bytes", piece, expected),
            ));
        }

        req.sink.writer.write_at(offset + written, &data).await?;
        written += len;
        progress.observe(written);
    }

    if written != expected {
        return Err(protocol_error(
            io::ErrorKind::UnexpectedEof,
            format!("range {}: body ended after {} of {} bytes", piece, written, expected),
        ));
    }
    Ok(written)
}

/// 206 is required, except that a 200 full body is fine when the whole file was asked for.
fn check_response(
    status: StatusCode,
    content_range: Option<&str>,
    piece: ByteRange,
    total: u64,
) -> Result<(), DownloadError> {
    match status {
        StatusCode::PARTIAL_CONTENT => match content_range {
            Some(v) => validate_content_range(v, piece),
            None => Ok(()),
        },
        StatusCode::OK if piece.covers_whole(total) => Ok(()),
        status => Err(DownloadError::UnexpectedStatus { status, range: piece }),
    }
}

/// `Content-Range: bytes <start>-<end>/<size|*>` must echo the requested range.
fn validate_content_range(value: &str, expected: ByteRange) -> Result<(), DownloadError> {
    let bad = |why: &str| {
        protocol_error(
            io::ErrorKind::InvalidData,
            format!("Content-Range {:?} for requested {}: {}", value, expected, why),
        )
    };

    let rest = value.trim().strip_prefix("bytes ").ok_or_else(|| bad("unknown unit"))?;
    let (span, _size) = rest.split_once('/').ok_or_else(|| bad("missing '/'"))?;
    let (s, e) = span.split_once('-').ok_or_else(|| bad("missing '-'"))?;
    let start: u64 = s.trim().parse().map_err(|_| bad("bad start"))?;
    let end: u64 = e.trim().parse().map_err(|_| bad("bad end"))?;

    if start != expected.start || end != expected.end {
        return Err(bad("mismatch"));
    }
    Ok(())
}

fn protocol_error(kind: io::ErrorKind, msg: String) -> DownloadError {
    DownloadError::network(msg.clone(), io::Error::new(kind, msg))
}

/// `base * 2^attempt`, capped at 30 s.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let base = base_ms.max(1);
    let shift = attempt.min(16);
    Duration::from_millis(base.saturating_mul(1u64 << shift).min(30_000))
}
