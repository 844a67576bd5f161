//! Auto-repair service.
//!
//! Tracks content whose owning record failed verification and tries to
//! recover it from the gateway pool. Each task moves through
//! `pending -> repairing -> {success, skipped, unrepairable, failed}`;
//! failed tasks are retried with exponential backoff until their attempt
//! budget runs out.
//!
//! The service is an explicit object: construct it with [`RepairService::new`],
//! call [`RepairService::start`] to run the periodic scan and
//! [`RepairService::stop`] to cancel it. Instances share nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::content_verifier::{ContentExpectation, ContentVerifier, FailureKind, Verdict};
use super::event_bus::{EventBus, RepairEvent};
use super::gateway_registry::GatewayRegistry;
use super::health_prober::HealthProber;
use super::persistence::StatePersistence;
use super::selector::{self, SelectionFilters};
use super::transport::{cancellable_sleep, GatewayTransport};
use crate::error::{AppError, Result};
use crate::models::repair_task::DEFAULT_MAX_ATTEMPTS;
use crate::models::{NewRepairTask, RepairOutcome, RepairStatus, RepairTask};

/// Repair service configuration
#[derive(Debug, Clone)]
pub struct RepairConfig {
    pub scan_interval: Duration,
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Backoff after the first failed attempt; doubles per attempt.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub download_timeout: Duration,
    /// Timeout for existence checks and ranged reads against references.
    pub probe_timeout: Duration,
    /// Names of trusted gateways asked first whether the content is intact.
    pub reference_gateways: Vec<String>,
    /// The catalog is re-probed before recovery when older than this.
    pub catalog_max_age: Duration,
    /// Tasks retained before the oldest finished ones are evicted.
    pub max_history: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(300),
            concurrency: 3,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(3600),
            download_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            reference_gateways: vec!["ipfs.io".into(), "dweb.link".into()],
            catalog_max_age: Duration::from_secs(600),
            max_history: 500,
        }
    }
}

/// Owner of the file records whose content is being repaired.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Mark the record as verified after its content was recovered.
    async fn mark_verified(&self, owner_record_id: &str, gateway: &str) -> Result<()>;
}

/// Record store that only logs; used when no metadata backend is attached.
pub struct LoggingRecordStore;

#[async_trait]
impl FileRecordStore for LoggingRecordStore {
    async fn mark_verified(&self, owner_record_id: &str, gateway: &str) -> Result<()> {
        tracing::info!(owner_record_id, gateway, "File record verified");
        Ok(())
    }
}

/// Collaborators of the repair service.
pub struct RepairDeps {
    pub transport: Arc<dyn GatewayTransport>,
    pub registry: Arc<GatewayRegistry>,
    pub prober: Arc<HealthProber>,
    pub records: Arc<dyn FileRecordStore>,
    pub persistence: Option<Arc<StatePersistence>>,
}

/// Task counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub total: usize,
    pub pending: usize,
    pub repairing: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unrepairable: usize,
}

/// Finished evaluation of one task.
struct Evaluation {
    status: RepairStatus,
    message: String,
    suggestions: Vec<String>,
    repaired_by: Option<String>,
}

impl Evaluation {
    fn unrepairable(message: impl Into<String>, suggestions: &[&str]) -> Self {
        Self {
            status: RepairStatus::Unrepairable,
            message: message.into(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
            repaired_by: None,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RepairService {
    config: RepairConfig,
    registry: Arc<GatewayRegistry>,
    prober: Arc<HealthProber>,
    records: Arc<dyn FileRecordStore>,
    persistence: Option<Arc<StatePersistence>>,
    verifier: ContentVerifier,
    tasks: Mutex<HashMap<String, RepairTask>>,
    events: EventBus<RepairEvent>,
    running: Mutex<Option<Running>>,
    /// Held across snapshot and write so saves land in order
    persist_lock: tokio::sync::Mutex<()>,
}

/// Delay before a task that failed `attempts` times may run again.
pub fn retry_backoff(config: &RepairConfig, attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
    config
        .retry_delay
        .checked_mul(factor)
        .unwrap_or(config.max_retry_delay)
        .min(config.max_retry_delay)
}

fn is_eligible(task: &RepairTask, config: &RepairConfig, now: DateTime<Utc>) -> bool {
    match task.status {
        RepairStatus::Pending => true,
        RepairStatus::Failed if task.has_attempts_left() => {
            let Some(last) = task.last_attempt_at else {
                return true;
            };
            let waited = now.signed_duration_since(last).to_std().unwrap_or(Duration::ZERO);
            waited >= retry_backoff(config, task.attempts)
        }
        _ => false,
    }
}

/// Drop the oldest finished tasks until at most `max` remain. A failed task
/// with no attempts left counts as finished.
fn evict_history(tasks: &mut HashMap<String, RepairTask>, max: usize) {
    if tasks.len() <= max {
        return;
    }
    let mut finished: Vec<(DateTime<Utc>, String)> = tasks
        .values()
        .filter(|t| {
            t.status.is_terminal() || (t.status == RepairStatus::Failed && !t.has_attempts_left())
        })
        .map(|t| (t.repaired_at.or(t.last_attempt_at).unwrap_or(t.created_at), t.id.clone()))
        .collect();
    finished.sort();
    let excess = tasks.len() - max;
    for (_, id) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
}

fn classify_failures(failures: &[(String, FailureKind)]) -> Evaluation {
    let all = |pred: fn(FailureKind) -> bool| failures.iter().all(|(_, k)| pred(*k));

    if all(FailureKind::is_connectivity) {
        return Evaluation::unrepairable(
            "No gateways available",
            &[
                "Check your network connection",
                "Try again later, gateways may be temporarily down",
            ],
        );
    }
    if all(|k| k == FailureKind::HashMismatch) {
        return Evaluation::unrepairable(
            "Content is corrupted on every gateway",
            &[
                "Re-upload the original file",
                "Verify the file on the device it was uploaded from",
            ],
        );
    }
    if all(|k| k == FailureKind::NotFound) {
        return Evaluation::unrepairable(
            "Content is no longer available on any gateway",
            &[
                "Re-upload the original file",
                "Ask the owner to share the file again",
            ],
        );
    }

    let summary = failures
        .iter()
        .map(|(gw, kind)| format!("{}: {}", gw, kind))
        .collect::<Vec<_>>()
        .join(", ");
    Evaluation::unrepairable(
        format!("Content could not be recovered ({})", summary),
        &["Try again later", "Re-upload the original file"],
    )
}

impl RepairService {
    pub fn new(config: RepairConfig, deps: RepairDeps) -> Self {
        let verifier = ContentVerifier::new(deps.transport, config.probe_timeout, config.download_timeout);
        Self {
            config,
            registry: deps.registry,
            prober: deps.prober,
            records: deps.records,
            persistence: deps.persistence,
            verifier,
            tasks: Mutex::new(HashMap::new()),
            events: EventBus::new(256),
            running: Mutex::new(None),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, RepairTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event_type: &str, task: &RepairTask, message: Option<String>) {
        self.events.publish(RepairEvent::now(
            event_type,
            task.id.clone(),
            task.content_id.clone(),
            task.status,
            message,
        ));
    }

    /// Start the periodic scan. The first scan runs immediately. Calling
    /// `start` on a running service does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let service = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = service.config.scan_interval.as_secs(), "Repair service started");
            loop {
                service.run_scan(&token).await;
                if cancellable_sleep(&token, service.config.scan_interval).await.is_err() {
                    break;
                }
            }
            tracing::info!("Repair service stopped");
        });

        *running = Some(Running { cancel, handle });
    }

    /// Stop the scan loop and wait for in-flight repairs to unwind.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                tracing::warn!(error = %e, "Repair loop ended abnormally");
            }
            self.persist().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepairEvent> {
        self.events.subscribe()
    }

    /// Queue content for repair.
    ///
    /// Re-adding an open task resets its attempt budget; re-adding a
    /// succeeded or skipped task reopens it. Running and unrepairable tasks
    /// are left alone.
    pub async fn add_task(&self, req: NewRepairTask) -> Result<RepairTask> {
        if req.content_id.trim().is_empty() || req.owner_record_id.trim().is_empty() {
            return Err(AppError::Validation(
                "content_id and owner_record_id are required".into(),
            ));
        }
        let req = NewRepairTask {
            max_attempts: req.max_attempts.or(Some(self.config.max_attempts)),
            ..req
        };

        let (task, event) = {
            let mut tasks = self.lock_tasks();
            let (task, event) = match tasks.get_mut(&req.owner_record_id) {
                Some(existing) => match existing.status {
                    RepairStatus::Repairing | RepairStatus::Unrepairable => (existing.clone(), None),
                    _ => {
                        existing.content_id = req.content_id;
                        if let Some(hash) = req.expected_hash {
                            existing.expected_hash = Some(crate::models::repair_task::normalize_hash(&hash));
                        }
                        if req.expected_size.is_some() {
                            existing.expected_size = req.expected_size;
                        }
                        existing.reopen();
                        (existing.clone(), Some("repair.requeued"))
                    }
                },
                None => {
                    let task = RepairTask::new(req);
                    tasks.insert(task.id.clone(), task.clone());
                    (task, Some("repair.queued"))
                }
            };
            evict_history(&mut tasks, self.config.max_history);
            (task, event)
        };

        if let Some(event) = event {
            tracing::info!(task_id = %task.id, content_id = %task.content_id, event, "Repair task queued");
            self.publish(event, &task, None);
            self.persist().await;
        }
        Ok(task)
    }

    /// Manually put a task back in the queue, including unrepairable ones.
    pub async fn retry_task(&self, id: &str) -> Result<RepairTask> {
        let task = {
            let mut tasks = self.lock_tasks();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("repair task '{}'", id)))?;
            if task.status == RepairStatus::Repairing {
                return Err(AppError::Conflict(format!(
                    "repair task '{}' is currently running",
                    id
                )));
            }
            task.reopen();
            task.clone()
        };

        tracing::info!(task_id = %task.id, "Repair task manually retried");
        self.publish("repair.requeued", &task, None);
        self.persist().await;
        Ok(task)
    }

    pub fn task(&self, id: &str) -> Option<RepairTask> {
        self.lock_tasks().get(id).cloned()
    }

    /// All tasks, oldest first.
    pub fn tasks(&self) -> Vec<RepairTask> {
        let mut tasks: Vec<RepairTask> = self.lock_tasks().values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn stats(&self) -> RepairStats {
        let tasks = self.lock_tasks();
        let mut stats = RepairStats {
            total: tasks.len(),
            ..RepairStats::default()
        };
        for task in tasks.values() {
            match task.status {
                RepairStatus::Pending => stats.pending += 1,
                RepairStatus::Repairing => stats.repairing += 1,
                RepairStatus::Success => stats.success += 1,
                RepairStatus::Failed => stats.failed += 1,
                RepairStatus::Skipped => stats.skipped += 1,
                RepairStatus::Unrepairable => stats.unrepairable += 1,
            }
        }
        stats
    }

    /// Drop every task that is not pending or running. Returns how many
    /// were removed.
    pub async fn clear_history(&self) -> usize {
        let removed = {
            let mut tasks = self.lock_tasks();
            let before = tasks.len();
            tasks.retain(|_, t| matches!(t.status, RepairStatus::Pending | RepairStatus::Repairing));
            before - tasks.len()
        };
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    fn eligible_ids(&self) -> Vec<String> {
        let now = Utc::now();
        let tasks = self.lock_tasks();
        let mut eligible: Vec<&RepairTask> = tasks
            .values()
            .filter(|t| is_eligible(t, &self.config, now))
            .collect();
        eligible.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        eligible.into_iter().map(|t| t.id.clone()).collect()
    }

    /// Run every eligible task once with bounded concurrency. Returns the
    /// number of tasks executed.
    pub async fn run_scan(self: &Arc<Self>, cancel: &CancellationToken) -> usize {
        let ids = self.eligible_ids();
        if ids.is_empty() {
            tracing::debug!("Repair scan: nothing to do");
            return 0;
        }

        let scan_id = Uuid::new_v4();
        tracing::info!(%scan_id, eligible = ids.len(), "Repair scan started");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut joinset = JoinSet::new();
        let mut executed = 0;

        for id in ids {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };
            executed += 1;

            let service = Arc::clone(self);
            let cancel = cancel.clone();
            joinset.spawn(async move {
                let _permit = permit;
                if let Err(e) = service.execute_repair(&id, &cancel).await {
                    if !e.is_cancelled() {
                        tracing::warn!(task_id = %id, error = %e, "Repair execution failed");
                    }
                }
            });
        }

        while let Some(res) = joinset.join_next().await {
            if let Err(e) = res {
                tracing::warn!(%scan_id, error = %e, "Repair task panicked");
            }
        }

        tracing::info!(%scan_id, executed, "Repair scan finished");
        executed
    }

    /// Run one repair attempt for task `id` and return its new status.
    ///
    /// Returns `Cancelled` (with the task restored to its previous state) when
    /// `cancel` fires mid-repair.
    pub async fn execute_repair(&self, id: &str, cancel: &CancellationToken) -> Result<RepairStatus> {
        let (task, previous) = {
            let mut tasks = self.lock_tasks();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("repair task '{}'", id)))?;
            let previous = task.clone();
            if task.status == RepairStatus::Failed {
                task.transition(RepairStatus::Pending)?;
            }
            task.transition(RepairStatus::Repairing)?;
            task.attempts += 1;
            task.last_attempt_at = Some(Utc::now());
            (task.clone(), previous)
        };

        tracing::info!(task_id = %task.id, content_id = %task.content_id, attempt = task.attempts, "Repair started");
        self.publish("repair.started", &task, None);

        let result = self.evaluate(&task, cancel).await;

        let updated = {
            let mut tasks = self.lock_tasks();
            let Some(current) = tasks.get_mut(id) else {
                return Err(AppError::NotFound(format!("repair task '{}'", id)));
            };
            match result {
                Ok(eval) => {
                    current.transition(eval.status)?;
                    current.error = None;
                    if eval.status == RepairStatus::Success {
                        current.repaired_at = Some(Utc::now());
                        current.repaired_by = eval.repaired_by;
                    }
                    current.outcome = Some(RepairOutcome {
                        success: matches!(eval.status, RepairStatus::Success | RepairStatus::Skipped),
                        message: eval.message,
                        suggestions: eval.suggestions,
                    });
                }
                Err(AppError::Cancelled) => {
                    *current = previous;
                    let restored = current.clone();
                    drop(tasks);
                    tracing::info!(task_id = %id, status = %restored.status, "Repair cancelled, task restored");
                    self.publish("repair.cancelled", &restored, None);
                    return Err(AppError::Cancelled);
                }
                Err(e) => {
                    current.transition(RepairStatus::Failed)?;
                    current.error = Some(e.to_string());
                    current.outcome = Some(RepairOutcome {
                        success: false,
                        message: e.to_string(),
                        suggestions: Vec::new(),
                    });
                }
            }
            current.clone()
        };

        let message = updated.outcome.as_ref().map(|o| o.message.clone());
        tracing::info!(
            task_id = %updated.id,
            status = %updated.status,
            attempts = updated.attempts,
            repaired_by = ?updated.repaired_by,
            message = ?message,
            "Repair finished"
        );
        self.publish("repair.finished", &updated, message);
        self.persist().await;

        Ok(updated.status)
    }

    async fn evaluate(&self, task: &RepairTask, cancel: &CancellationToken) -> Result<Evaluation> {
        let expected = ContentExpectation {
            hash: task.expected_hash.clone(),
            size: task.expected_size,
        };

        // Verify
        let references: Vec<_> = self
            .config
            .reference_gateways
            .iter()
            .filter_map(|name| self.registry.get(name))
            .collect();
        if !references.is_empty() {
            match self
                .verifier
                .verify_reference(&task.content_id, &expected, &references, cancel)
                .await?
            {
                Verdict::Intact { gateway } => {
                    return Ok(Evaluation {
                        status: RepairStatus::Skipped,
                        message: format!("Content verified intact on {}, no repair needed", gateway),
                        suggestions: Vec::new(),
                        repaired_by: None,
                    });
                }
                Verdict::Damaged { gateway, reason } => {
                    tracing::debug!(task_id = %task.id, gateway, reason, "Reference check failed");
                }
                Verdict::Inconclusive { reason } => {
                    tracing::debug!(task_id = %task.id, reason, "Reference check inconclusive");
                }
            }
        }

        // Recover
        self.refresh_catalog(cancel).await?;
        let candidates = selector::rank(&self.registry.list(), &SelectionFilters::default());
        if candidates.is_empty() {
            return Ok(classify_failures(&[]));
        }

        let mut failures = Vec::with_capacity(candidates.len());
        for gateway in &candidates {
            match self
                .verifier
                .fetch_verified(gateway, &task.content_id, &expected, cancel)
                .await
            {
                Ok(_) => {
                    self.records
                        .mark_verified(&task.owner_record_id, &gateway.name)
                        .await?;
                    return Ok(Evaluation {
                        status: RepairStatus::Success,
                        message: format!("Content recovered from {}", gateway.name),
                        suggestions: Vec::new(),
                        repaired_by: Some(gateway.name.clone()),
                    });
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => match FailureKind::classify(&e) {
                    Some(kind) => {
                        tracing::debug!(task_id = %task.id, gateway = %gateway.name, reason = %kind, "Recovery attempt failed");
                        failures.push((gateway.name.clone(), kind));
                    }
                    None => return Err(e),
                },
            }
        }

        Ok(classify_failures(&failures))
    }

    async fn refresh_catalog(&self, cancel: &CancellationToken) -> Result<()> {
        let max_age = chrono::Duration::from_std(self.config.catalog_max_age)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let stale = self
            .registry
            .last_checked_at()
            .map_or(true, |at| Utc::now() - at > max_age);
        if stale {
            tracing::debug!("Gateway catalog stale, probing before recovery");
            self.prober.probe_all(&self.registry, None, cancel).await;
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
        }
        Ok(())
    }

    /// Save the open part of the queue. Failures are logged, not returned.
    pub async fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let tasks = self.tasks();
        if let Err(e) = persistence.save_repair_queue(&tasks).await {
            tracing::warn!(error = %e, "Failed to persist repair queue");
        }
    }

    /// Load the persisted queue. Tasks already known are kept as they are.
    pub async fn restore(&self) -> usize {
        let Some(persistence) = &self.persistence else {
            return 0;
        };
        let loaded = persistence.load_repair_queue().await;
        let mut tasks = self.lock_tasks();
        let mut restored = 0;
        for task in loaded {
            if !tasks.contains_key(&task.id) {
                tasks.insert(task.id.clone(), task);
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!(restored, "Restored repair queue");
        }
        restored
    }
}
