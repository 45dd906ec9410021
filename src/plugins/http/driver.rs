use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    RANGE, USER_AGENT,
};
use std::time::Duration;

use crate::core::error::DownloadError;
use crate::core::model::{ByteRange, RemoteInfo};
use crate::plugins::driver::{DriverContext, RangeResponse, TransferDriver};

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadError::network("build http client", e))?;
        Ok(Self { client })
    }

    fn build_headers(ctx: &DriverContext) -> Result<HeaderMap, DownloadError> {
        let mut h = HeaderMap::new();
        h.insert(
            USER_AGENT,
            HeaderValue::from_str(&ctx.user_agent)
                .map_err(|e| DownloadError::InvalidInput(format!("user agent: {}", e)))?,
        );
        // byte offsets must refer to the stored representation
        h.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        for (k, v) in &ctx.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| DownloadError::InvalidInput(format!("header name {:?}: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| DownloadError::InvalidInput(format!("header value for {}: {}", k, e)))?;
            h.insert(name, value);
        }
        Ok(h)
    }

    fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
        headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
    }

    fn accept_ranges_hint(headers: &HeaderMap) -> bool {
        headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase().contains("bytes"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TransferDriver for HttpDriver {
    fn name(&self) -> &'static str {
        "http-driver"
    }

    async fn probe(&self, url: &str, ctx: &DriverContext) -> Result<RemoteInfo, DownloadError> {
        let headers = Self::build_headers(ctx)?;

        let head = self
            .client
            .head(url)
            .headers(headers)
            .timeout(Duration::from_secs(ctx.timeout_secs))
            .send()
            .await
            .map_err(|e| DownloadError::ProbeFailed(format!("HEAD {}: {}", url, e)))?;

        if !head.status().is_success() {
            return Err(DownloadError::ProbeFailed(format!("HEAD {} returned {}", url, head.status())));
        }

        // reqwest reports the (empty) HEAD body size, so read the header itself
        let content_length = Self::header_str(head.headers(), CONTENT_LENGTH).and_then(|s| s.trim().parse::<u64>().ok());

        Ok(RemoteInfo {
            content_length,
            accepts_ranges: Self::accept_ranges_hint(head.headers()),
            content_type: Self::header_str(head.headers(), CONTENT_TYPE),
        })
    }

    async fn open_range(
        &self,
        url: &str,
        ctx: &DriverContext,
        range: ByteRange,
    ) -> Result<RangeResponse, DownloadError> {
        let headers = Self::build_headers(ctx)?;

        let send = self.client.get(url).headers(headers).header(RANGE, range.header_value()).send();

        // not a whole-request timeout: the body is bounded per read by the fetcher
        let resp = tokio::time::timeout(Duration::from_secs(ctx.timeout_secs), send)
            .await
            .map_err(|e| DownloadError::network(format!("GET {} range {}: timed out", url, range), e))?
            .map_err(|e| DownloadError::network(format!("GET {} range {}", url, range), e))?;

        let status = resp.status();
        let content_range = Self::header_str(resp.headers(), CONTENT_RANGE);
        let body = resp.bytes_stream().map_err(|e| DownloadError::network("read response body", e)).boxed();

        Ok(RangeResponse { status, content_range, body })
    }
}
