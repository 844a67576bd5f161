//! HTTP transport used to talk to gateways.
//!
//! Every network call in the subsystem goes through [`GatewayTransport`], so
//! probing, racing and repair can be exercised against mock gateways.
//! Cancellation is structural: callers wrap calls in [`with_cancel`] and a
//! fired token drops the request future, which aborts the connection.

use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Metadata returned by an existence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub cors_enabled: bool,
    pub range_support: bool,
}

impl HeadResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access to gateways.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Lightweight existence check. Any HTTP status is returned as `Ok`;
    /// only transport failures (connect, DNS, timeout) are errors.
    async fn head(&self, url: &str, timeout: Duration) -> Result<HeadResponse>;

    /// Download content, optionally a byte range. Non-2xx statuses are
    /// classified into `NotFound` / `ServerError` / `HttpStatus`.
    ///
    /// At most `range.end` bytes are read when a range is given, even from a
    /// gateway that ignores `Range`. A body longer than `max_len` fails with
    /// `VerificationMismatch` as soon as the excess arrives.
    async fn get(
        &self,
        url: &str,
        range: Option<Range<u64>>,
        max_len: Option<u64>,
        timeout: Duration,
    ) -> Result<Bytes>;
}

/// Run `fut` until it completes or `cancel` fires.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = fut => res,
    }
}

/// Sleep that ends early with `Cancelled` when the token fires.
pub async fn cancellable_sleep(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        };
    }
    with_cancel(cancel, async {
        tokio::time::sleep(delay).await;
        Ok(())
    })
    .await
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gateway-keeper/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn head(&self, url: &str, timeout: Duration) -> Result<HeadResponse> {
        let response = self.client.head(url).timeout(timeout).send().await?;

        let headers = response.headers();
        let cors_enabled = headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN);
        let range_support = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(HeadResponse {
            status: response.status().as_u16(),
            content_length,
            cors_enabled,
            range_support,
        })
    }

    async fn get(
        &self,
        url: &str,
        range: Option<Range<u64>>,
        max_len: Option<u64>,
        timeout: Duration,
    ) -> Result<Bytes> {
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(range) = &range {
            if range.end > range.start {
                request = request.header(
                    header::RANGE,
                    format!("bytes={}-{}", range.start, range.end - 1),
                );
            }
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::from_status(status.as_u16(), url));
        }

        // A gateway that ignores Range answers 200 with the whole body
        let whole_body = status == reqwest::StatusCode::OK;
        let wanted = range.as_ref().map(|r| {
            if whole_body {
                r.end
            } else {
                r.end.saturating_sub(r.start)
            }
        });

        let mut buf = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            buf.extend_from_slice(&chunk);
            if let Some(limit) = max_len {
                if buf.len() as u64 > limit {
                    return Err(AppError::VerificationMismatch(format!(
                        "size: body exceeds expected {} bytes",
                        limit
                    )));
                }
            }
            if wanted.is_some_and(|w| buf.len() as u64 >= w) {
                break;
            }
        }

        let mut body = buf.freeze();
        if let (Some(range), Some(wanted)) = (range, wanted) {
            let len = body.len() as u64;
            let (start, end) = if whole_body {
                (range.start.min(len), range.end.min(len))
            } else {
                (0, wanted.min(len))
            };
            body = body.slice(start as usize..end.max(start) as usize);
        }

        Ok(body)
    }
}
