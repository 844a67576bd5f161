//! Byte-level content verification.
//!
//! Two checks are offered. A cheap reference check asks trusted gateways
//! whether they can serve the content intact (existence, size, and the hash of
//! a 1 MiB prefix when that prefix is the whole content). A full fetch
//! downloads from one gateway and verifies size and SHA-256.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::transport::{with_cancel, GatewayTransport};
use crate::error::{AppError, Result};
use crate::models::repair_task::normalize_hash;
use crate::models::Gateway;

/// Prefix fetched by the reference check.
pub const VERIFY_RANGE_BYTES: u64 = 1024 * 1024;

/// What the content is supposed to look like.
#[derive(Debug, Clone, Default)]
pub struct ContentExpectation {
    /// Lower-case hex SHA-256
    pub hash: Option<String>,
    pub size: Option<u64>,
}

/// Result of a reference check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A reference gateway serves the content and every available check passed.
    Intact { gateway: String },
    /// A reference gateway answered, and what it serves is wrong or missing.
    Damaged { gateway: String, reason: String },
    /// Nothing conclusive: no reference reachable, or the hash cannot be
    /// checked from a prefix.
    Inconclusive { reason: String },
}

/// Why a recovery attempt against one gateway failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    HashMismatch,
    NotFound,
    NetworkError,
    Timeout,
    ServerError,
}

impl FailureKind {
    /// Map a transport or verification error to a failure kind. Returns `None`
    /// for errors that say nothing about the gateway (cancellation, internal).
    pub fn classify(err: &AppError) -> Option<Self> {
        match err {
            AppError::VerificationMismatch(_) => Some(FailureKind::HashMismatch),
            AppError::NotFound(_) => Some(FailureKind::NotFound),
            AppError::NetworkUnreachable(_) => Some(FailureKind::NetworkError),
            AppError::Timeout(_) => Some(FailureKind::Timeout),
            AppError::ServerError { .. } | AppError::HttpStatus { .. } => Some(FailureKind::ServerError),
            _ => None,
        }
    }

    pub fn is_connectivity(self) -> bool {
        matches!(self, FailureKind::NetworkError | FailureKind::Timeout)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::HashMismatch => "hash mismatch",
            FailureKind::NotFound => "not found",
            FailureKind::NetworkError => "network error",
            FailureKind::Timeout => "timeout",
            FailureKind::ServerError => "server error",
        };
        f.write_str(s)
    }
}

/// Lower-case hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Check `data` against the expectation.
pub fn check_bytes(data: &[u8], expected: &ContentExpectation) -> Result<()> {
    if let Some(size) = expected.size {
        if data.len() as u64 != size {
            return Err(AppError::VerificationMismatch(format!(
                "size: expected {} got {}",
                size,
                data.len()
            )));
        }
    }
    if let Some(hash) = &expected.hash {
        let actual = sha256_hex(data);
        if actual != normalize_hash(hash) {
            return Err(AppError::VerificationMismatch(format!(
                "sha256: expected {} got {}",
                hash, actual
            )));
        }
    }
    Ok(())
}

pub struct ContentVerifier {
    transport: Arc<dyn GatewayTransport>,
    probe_timeout: Duration,
    download_timeout: Duration,
}

impl ContentVerifier {
    pub fn new(transport: Arc<dyn GatewayTransport>, probe_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            transport,
            probe_timeout,
            download_timeout,
        }
    }

    /// Ask reference gateways, in order, whether the content is intact. The
    /// first gateway that answers decides; unreachable ones are skipped.
    pub async fn verify_reference(
        &self,
        content_id: &str,
        expected: &ContentExpectation,
        references: &[Gateway],
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        for gateway in references {
            match self.check_reference(gateway, content_id, expected, cancel).await {
                Ok(verdict) => return Ok(verdict),
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    tracing::debug!(gateway = %gateway.name, error = %e, "Reference gateway unusable");
                }
            }
        }
        Ok(Verdict::Inconclusive {
            reason: "no reference gateway reachable".into(),
        })
    }

    /// `Err` means the reference could not be used and the next one should
    /// be tried.
    async fn check_reference(
        &self,
        gateway: &Gateway,
        content_id: &str,
        expected: &ContentExpectation,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let url = gateway.url_for(content_id);
        let damaged = |reason: String| Verdict::Damaged {
            gateway: gateway.name.clone(),
            reason,
        };

        let head = with_cancel(cancel, self.transport.head(&url, self.probe_timeout)).await?;
        if head.status == 404 {
            return Ok(damaged("content not found".into()));
        }
        if !head.is_success() {
            return Err(AppError::from_status(head.status, &url));
        }

        if let (Some(want), Some(got)) = (expected.size, head.content_length) {
            if want != got {
                return Ok(damaged(format!("size: expected {} got {}", want, got)));
            }
        }

        let Some(hash) = &expected.hash else {
            return Ok(Verdict::Intact { gateway: gateway.name.clone() });
        };

        let prefix = match with_cancel(
            cancel,
            self.transport.get(&url, Some(0..VERIFY_RANGE_BYTES), None, self.probe_timeout),
        )
        .await
        {
            Ok(prefix) => prefix,
            Err(AppError::NotFound(_)) => return Ok(damaged("content not found".into())),
            Err(e) => return Err(e),
        };

        let total = expected.size.or(head.content_length);
        let whole = match total {
            Some(total) => total <= VERIFY_RANGE_BYTES,
            None => (prefix.len() as u64) < VERIFY_RANGE_BYTES,
        };
        if !whole {
            return Ok(Verdict::Inconclusive {
                reason: format!(
                    "content larger than {} bytes, hash not checkable from prefix",
                    VERIFY_RANGE_BYTES
                ),
            });
        }

        let check = ContentExpectation {
            hash: Some(hash.clone()),
            size: total,
        };
        match check_bytes(&prefix, &check) {
            Ok(()) => Ok(Verdict::Intact { gateway: gateway.name.clone() }),
            Err(e) => Ok(damaged(e.to_string())),
        }
    }

    /// Download the whole content from `gateway` and verify it.
    pub async fn fetch_verified(
        &self,
        gateway: &Gateway,
        content_id: &str,
        expected: &ContentExpectation,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let url = gateway.url_for(content_id);
        let body = with_cancel(
            cancel,
            self.transport.get(&url, None, expected.size, self.download_timeout),
        )
        .await?;
        check_bytes(&body, expected)?;
        tracing::debug!(gateway = %gateway.name, size = body.len(), "Content verified");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewaySeed;
    use crate::services::transport::mock::{MockTransport, Reply};

    const CONTENT: &[u8] = b"hello gateway";

    fn gw(name: &str) -> Gateway {
        Gateway::from_seed(
            GatewaySeed {
                name: name.into(),
                url_template: format!("https://{}/ipfs/", name),
                region: "international".into(),
                priority: 0,
            },
            false,
        )
    }

    fn verifier(transport: Arc<MockTransport>) -> ContentVerifier {
        ContentVerifier::new(transport, Duration::from_millis(200), Duration::from_millis(500))
    }

    fn expect_content() -> ContentExpectation {
        ContentExpectation {
            hash: Some(sha256_hex(CONTENT)),
            size: Some(CONTENT.len() as u64),
        }
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_check_bytes_accepts_prefixed_hash() {
        let expected = ContentExpectation {
            hash: Some(format!("sha256:{}", sha256_hex(CONTENT).to_uppercase())),
            size: None,
        };
        check_bytes(CONTENT, &expected).unwrap();
    }

    #[test]
    fn test_check_bytes_mismatch() {
        let err = check_bytes(b"tampered", &expect_content()).unwrap_err();
        assert!(matches!(err, AppError::VerificationMismatch(_)));
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(FailureKind::classify(&AppError::NotFound("x".into())), Some(FailureKind::NotFound));
        assert_eq!(FailureKind::classify(&AppError::Timeout("x".into())), Some(FailureKind::Timeout));
        assert_eq!(
            FailureKind::classify(&AppError::ServerError { status: 503, message: "x".into() }),
            Some(FailureKind::ServerError)
        );
        assert_eq!(FailureKind::classify(&AppError::Cancelled), None);
        assert!(FailureKind::NetworkError.is_connectivity());
        assert!(!FailureKind::HashMismatch.is_connectivity());
    }

    #[tokio::test]
    async fn test_reference_intact() {
        let transport = MockTransport::new();
        transport.route("https://ref.test/", Reply::body(0, CONTENT));
        let verdict = verifier(transport)
            .verify_reference("cid", &expect_content(), &[gw("ref.test")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Intact { gateway: "ref.test".into() });
    }

    #[tokio::test]
    async fn test_reference_skips_unreachable() {
        let transport = MockTransport::new();
        transport.route("https://up.test/", Reply::body(0, b"corrupted!!!!".as_slice()));
        let verdict = verifier(transport)
            .verify_reference(
                "cid",
                &expect_content(),
                &[gw("down.test"), gw("up.test")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::Damaged { ref gateway, .. } if gateway == "up.test"));
    }

    #[tokio::test]
    async fn test_reference_not_found_is_damaged() {
        let transport = MockTransport::new();
        transport.route("https://ref.test/", Reply::status(404));
        let verdict = verifier(transport)
            .verify_reference("cid", &expect_content(), &[gw("ref.test")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::Damaged { .. }));
    }

    #[tokio::test]
    async fn test_reference_large_content_is_inconclusive() {
        let big = vec![7u8; (VERIFY_RANGE_BYTES + 10) as usize];
        let transport = MockTransport::new();
        transport.route("https://ref.test/", Reply::body(0, big.clone()));
        let expected = ContentExpectation {
            hash: Some(sha256_hex(&big)),
            size: Some(big.len() as u64),
        };
        let verdict = verifier(transport)
            .verify_reference("cid", &expected, &[gw("ref.test")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::Inconclusive { .. }));
    }

    #[tokio::test]
    async fn test_reference_none_reachable() {
        let verdict = verifier(MockTransport::new())
            .verify_reference("cid", &expect_content(), &[gw("a.test"), gw("b.test")], &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::Inconclusive { .. }));
    }

    #[tokio::test]
    async fn test_fetch_verified() {
        let transport = MockTransport::new();
        transport.route("https://good.test/", Reply::body(0, CONTENT));
        transport.route("https://bad.test/", Reply::body(0, b"other bytes!!".as_slice()));
        let v = verifier(transport);
        let cancel = CancellationToken::new();

        let body = v.fetch_verified(&gw("good.test"), "cid", &expect_content(), &cancel).await.unwrap();
        assert_eq!(&body[..], CONTENT);

        let err = v.fetch_verified(&gw("bad.test"), "cid", &expect_content(), &cancel).await.unwrap_err();
        assert_eq!(FailureKind::classify(&err), Some(FailureKind::HashMismatch));

        let err = v.fetch_verified(&gw("gone.test"), "cid", &expect_content(), &cancel).await.unwrap_err();
        assert_eq!(FailureKind::classify(&err), Some(FailureKind::NetworkError));
    }
}
