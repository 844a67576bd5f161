//! Multi-gateway download race.
//!
//! Candidates are ranked best-first and tried in small concurrent batches.
//! The first gateway to confirm the content wins and the rest of its batch is
//! cancelled. When no gateway confirms within the deadline the top-ranked
//! candidate is returned unverified so the caller still has a URL to try.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::selector;
use super::transport::{cancellable_sleep, with_cancel, GatewayTransport};
use crate::error::{AppError, Result};
use crate::models::Gateway;

/// Race settings
#[derive(Debug, Clone)]
pub struct RaceOptions {
    pub batch_size: usize,
    pub per_attempt_timeout: Duration,
    pub overall_deadline: Duration,
    pub inter_batch_delay: Duration,
}

impl Default for RaceOptions {
    fn default() -> Self {
        Self {
            batch_size: 3,
            per_attempt_timeout: Duration::from_secs(10),
            overall_deadline: Duration::from_secs(30),
            inter_batch_delay: Duration::from_millis(100),
        }
    }
}

/// Result of a race.
#[derive(Debug, Clone, Serialize)]
pub struct RaceOutcome {
    pub gateway: Gateway,
    pub url: String,
    /// False when no gateway confirmed the content and this is the fallback.
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Won { latency_ms: u64 },
    Failed { reason: String },
}

/// Emitted as each attempt settles.
#[derive(Debug, Clone, Serialize)]
pub struct RaceProgress {
    pub gateway: String,
    pub outcome: AttemptOutcome,
}

pub struct DownloadRace {
    transport: Arc<dyn GatewayTransport>,
    options: RaceOptions,
}

struct Attempt {
    gateway: Gateway,
    url: String,
    elapsed: Duration,
    result: Result<u16>,
}

impl DownloadRace {
    pub fn new(transport: Arc<dyn GatewayTransport>, options: RaceOptions) -> Self {
        Self { transport, options }
    }

    /// Race `candidates` for `content_id`.
    pub async fn race(
        &self,
        content_id: &str,
        candidates: &[Gateway],
        progress: Option<mpsc::Sender<RaceProgress>>,
        cancel: &CancellationToken,
    ) -> Result<RaceOutcome> {
        if candidates.is_empty() {
            return Err(AppError::NoCandidates(format!(
                "no gateways to race for {}",
                content_id
            )));
        }

        let mut ranked = candidates.to_vec();
        ranked.sort_by(selector::compare);

        let race_id = Uuid::new_v4();
        let race_cancel = cancel.child_token();
        tracing::debug!(%race_id, content_id, candidates = ranked.len(), "Starting download race");

        let winner = tokio::time::timeout(
            self.options.overall_deadline,
            self.run_batches(content_id, &ranked, progress.as_ref(), &race_cancel),
        )
        .await;
        race_cancel.cancel();

        match winner {
            Ok(Ok(Some(outcome))) => {
                tracing::info!(%race_id, gateway = %outcome.gateway.name, "Download race won");
                return Ok(outcome);
            }
            Ok(Err(AppError::Cancelled)) | Ok(Ok(None)) | Err(_) if cancel.is_cancelled() => {
                return Err(AppError::Cancelled);
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(None)) => {
                tracing::warn!(%race_id, content_id, "No gateway confirmed content, using fallback");
            }
            Err(_) => {
                tracing::warn!(%race_id, content_id, "Download race deadline elapsed, using fallback");
            }
        }

        let gateway = ranked.swap_remove(0);
        let url = gateway.url_for(content_id);
        Ok(RaceOutcome {
            gateway,
            url,
            verified: false,
        })
    }

    async fn run_batches(
        &self,
        content_id: &str,
        ranked: &[Gateway],
        progress: Option<&mpsc::Sender<RaceProgress>>,
        cancel: &CancellationToken,
    ) -> Result<Option<RaceOutcome>> {
        for (index, batch) in ranked.chunks(self.options.batch_size.max(1)).enumerate() {
            if index > 0 {
                cancellable_sleep(cancel, self.options.inter_batch_delay).await?;
            }

            let batch_cancel = cancel.child_token();
            let mut joinset = JoinSet::new();
            for gateway in batch {
                let transport = self.transport.clone();
                let token = batch_cancel.clone();
                let timeout = self.options.per_attempt_timeout;
                let gateway = gateway.clone();
                let url = gateway.url_for(content_id);
                joinset.spawn(async move {
                    let started = Instant::now();
                    let result = with_cancel(&token, transport.head(&url, timeout))
                        .await
                        .and_then(|resp| {
                            if resp.is_success() {
                                Ok(resp.status)
                            } else {
                                Err(AppError::from_status(resp.status, &url))
                            }
                        });
                    Attempt {
                        gateway,
                        url,
                        elapsed: started.elapsed(),
                        result,
                    }
                });
            }

            let mut winner = None;
            while let Some(joined) = joinset.join_next().await {
                let Ok(attempt) = joined else {
                    continue;
                };
                match attempt.result {
                    Ok(_) => {
                        report(
                            progress,
                            &attempt.gateway.name,
                            AttemptOutcome::Won {
                                latency_ms: attempt.elapsed.as_millis() as u64,
                            },
                        )
                        .await;
                        winner = Some(RaceOutcome {
                            gateway: attempt.gateway,
                            url: attempt.url,
                            verified: true,
                        });
                        break;
                    }
                    Err(AppError::Cancelled) => {}
                    Err(e) => {
                        tracing::debug!(gateway = %attempt.gateway.name, error = %e, "Race attempt failed");
                        report(
                            progress,
                            &attempt.gateway.name,
                            AttemptOutcome::Failed {
                                reason: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
            }

            // Losers are cancelled and awaited so no request outlives the race
            batch_cancel.cancel();
            joinset.abort_all();
            while joinset.join_next().await.is_some() {}

            if winner.is_some() {
                return Ok(winner);
            }
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
        }
        Ok(None)
    }
}

async fn report(progress: Option<&mpsc::Sender<RaceProgress>>, gateway: &str, outcome: AttemptOutcome) {
    if let Some(tx) = progress {
        let _ = tx
            .send(RaceProgress {
                gateway: gateway.to_string(),
                outcome,
            })
            .await;
    }
}
