#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunk_downloader::core::error::DownloadError;
use chunk_downloader::core::model::{ByteRange, RemoteInfo};
use chunk_downloader::plugins::driver::{DriverContext, RangeResponse, TransferDriver};
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const URL: &str = "http://files.test/data.bin";

pub fn sample_content(len: usize) -> Bytes {
    (0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<u8>>().into()
}

/// Serves one in-memory resource with configurable misbehaviour.
pub struct MemoryDriver {
    pub content: Bytes,
    pub accept_ranges: bool,
    pub report_length: bool,
    /// Answer every range request with 200 and the full body.
    pub ignore_range: bool,
    /// Requests covering this offset fail before a response arrives.
    pub fail_at: Option<u64>,
    /// Number of bodies that break off halfway through.
    pub mid_body_failures: AtomicU32,
    /// Body piece size.
    pub piece: usize,
    pub delay_for: Option<Box<dyn Fn(ByteRange) -> Duration + Send + Sync>>,
    pub requests: Mutex<Vec<ByteRange>>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl MemoryDriver {
    pub fn new(content: Bytes) -> Self {
        Self {
            content,
            accept_ranges: true,
            report_length: true,
            ignore_range: false,
            fail_at: None,
            mid_body_failures: AtomicU32::new(0),
            piece: 16,
            delay_for: None,
            requests: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn requested(&self) -> Vec<ByteRange> {
        self.requests.lock().unwrap().clone()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn simulated_reset() -> DownloadError {
    DownloadError::network(
        "simulated transport failure",
        std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer"),
    )
}

#[async_trait]
impl TransferDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory-driver"
    }

    async fn probe(&self, _url: &str, _ctx: &DriverContext) -> Result<RemoteInfo, DownloadError> {
        Ok(RemoteInfo {
            content_length: self.report_length.then(|| self.content.len() as u64),
            accepts_ranges: self.accept_ranges,
            content_type: Some("application/octet-stream".to_string()),
        })
    }

    async fn open_range(
        &self,
        _url: &str,
        _ctx: &DriverContext,
        range: ByteRange,
    ) -> Result<RangeResponse, DownloadError> {
        self.requests.lock().unwrap().push(range);

        if let Some(off) = self.fail_at {
            if range.start <= off && off <= range.end {
                return Err(simulated_reset());
            }
        }

        let delay = self.delay_for.as_ref().map(|f| f(range)).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let total = self.content.len() as u64;
        let (status, content_range, body) = if self.ignore_range {
            (StatusCode::OK, None, self.content.clone())
        } else {
            let body = self.content.slice(range.start as usize..=range.end as usize);
            (
                StatusCode::PARTIAL_CONTENT,
                Some(format!("bytes {}-{}/{}", range.start, range.end, total)),
                body,
            )
        };

        let mut pieces: Vec<Result<Bytes, DownloadError>> = body
            .chunks(self.piece.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let breaks = self
            .mid_body_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if breaks {
            let keep = (pieces.len() / 2).max(1);
            pieces.truncate(keep);
            pieces.push(Err(simulated_reset()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(self.in_flight.clone());

        let body = stream::iter(pieces)
            .map(move |p| {
                let _held = &guard;
                p
            })
            .boxed();

        Ok(RangeResponse {
            status,
            content_range,
            body,
        })
    }
}
