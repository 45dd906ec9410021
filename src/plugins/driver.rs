use crate::core::error::DownloadError;
use crate::core::model::{ByteRange, RemoteInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    /// Bound for opening a request and for each body read.
    pub timeout_secs: u64,
    /// Extra attempts per range after the first one fails.
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            user_agent: concat!("chunk-downloader/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: HashMap::new(),
            timeout_secs: 60,
            retries: 0,
            retry_backoff_ms: 400,
        }
    }
}

pub type BodyStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// Response head plus a body stream of one ranged GET.
pub struct RangeResponse {
    pub status: StatusCode,
    /// Raw `Content-Range` header, if any.
    pub content_range: Option<String>,
    pub body: BodyStream,
}

#[async_trait]
pub trait TransferDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Metadata probe (HEAD-equivalent).
    async fn probe(&self, url: &str, ctx: &DriverContext) -> Result<RemoteInfo, DownloadError>;

    /// Issue a GET restricted to `range`. Status checking is left to the caller.
    async fn open_range(
        &self,
        url: &str,
        ctx: &DriverContext,
        range: ByteRange,
    ) -> Result<RangeResponse, DownloadError>;
}
