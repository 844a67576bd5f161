//! Repair task model for content that failed verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Default number of automatic repair attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Repair task status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStatus {
    Pending,
    Repairing,
    Success,
    Failed,
    Skipped,
    Unrepairable,
}

impl RepairStatus {
    /// Terminal states are never picked up by the automatic scan.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RepairStatus::Success | RepairStatus::Skipped | RepairStatus::Unrepairable
        )
    }

    /// Transitions the repair engine itself may perform.
    ///
    /// `Repairing -> Pending` is the rollback taken when a repair is cancelled.
    pub fn can_transition_to(self, next: RepairStatus) -> bool {
        use RepairStatus::*;
        matches!(
            (self, next),
            (Pending, Repairing)
                | (Repairing, Success)
                | (Repairing, Skipped)
                | (Repairing, Unrepairable)
                | (Repairing, Failed)
                | (Repairing, Pending)
                | (Failed, Pending)
        )
    }
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepairStatus::Pending => "pending",
            RepairStatus::Repairing => "repairing",
            RepairStatus::Success => "success",
            RepairStatus::Failed => "failed",
            RepairStatus::Skipped => "skipped",
            RepairStatus::Unrepairable => "unrepairable",
        };
        f.write_str(s)
    }
}

/// User-facing result of a finished repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub success: bool,
    pub message: String,
    pub suggestions: Vec<String>,
}

/// Request to track a content item that failed verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRepairTask {
    pub content_id: String,
    pub owner_record_id: String,
    pub expected_hash: Option<String>,
    pub expected_size: Option<u64>,
    pub max_attempts: Option<u32>,
}

/// Repair task entity.
///
/// One task per owner record. Mutated only by the repair service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairTask {
    pub id: String,
    pub content_id: String,
    pub owner_record_id: String,
    pub expected_hash: Option<String>,
    pub expected_size: Option<u64>,
    pub status: RepairStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub repaired_at: Option<DateTime<Utc>>,
    pub repaired_by: Option<String>,
    pub outcome: Option<RepairOutcome>,
    pub created_at: DateTime<Utc>,
}

impl RepairTask {
    pub fn new(req: NewRepairTask) -> Self {
        Self {
            id: req.owner_record_id.clone(),
            content_id: req.content_id,
            owner_record_id: req.owner_record_id,
            expected_hash: req.expected_hash.map(|h| normalize_hash(&h)),
            expected_size: req.expected_size,
            status: RepairStatus::Pending,
            attempts: 0,
            max_attempts: req.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            last_attempt_at: None,
            error: None,
            repaired_at: None,
            repaired_by: None,
            outcome: None,
            created_at: Utc::now(),
        }
    }

    /// Apply an engine transition, rejecting anything the state machine forbids.
    pub fn transition(&mut self, next: RepairStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "repair task {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Put the task back into the queue with a fresh attempt budget.
    ///
    /// Used for manual retries and for re-reported verification failures.
    pub fn reopen(&mut self) {
        self.status = RepairStatus::Pending;
        self.attempts = 0;
        self.error = None;
        self.outcome = None;
        self.last_attempt_at = None;
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Lower-case a hex digest and strip an optional `sha256:` prefix.
pub fn normalize_hash(hash: &str) -> String {
    let trimmed = hash.trim();
    let digest = trimmed
        .strip_prefix("sha256:")
        .or_else(|| trimmed.strip_prefix("SHA256:"))
        .unwrap_or(trimmed);
    digest.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task() -> RepairTask {
        RepairTask::new(NewRepairTask {
            content_id: "bafyabc".into(),
            owner_record_id: "file-1".into(),
            expected_hash: Some("sha256:ABCDEF".into()),
            expected_size: Some(42),
            max_attempts: None,
        })
    }

    #[test]
    fn test_new_task_defaults() {
        let task = new_task();
        assert_eq!(task.id, "file-1");
        assert_eq!(task.status, RepairStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(task.expected_hash.as_deref(), Some("abcdef"));
    }

    #[test]
    fn test_allowed_transitions() {
        let mut task = new_task();
        task.transition(RepairStatus::Repairing).unwrap();
        task.transition(RepairStatus::Failed).unwrap();
        task.transition(RepairStatus::Pending).unwrap();
        task.transition(RepairStatus::Repairing).unwrap();
        task.transition(RepairStatus::Success).unwrap();
        assert_eq!(task.status, RepairStatus::Success);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        for terminal in [
            RepairStatus::Success,
            RepairStatus::Skipped,
            RepairStatus::Unrepairable,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(RepairStatus::Pending));
            assert!(!terminal.can_transition_to(RepairStatus::Repairing));
        }
    }

    #[test]
    fn test_pending_cannot_jump_to_success() {
        let mut task = new_task();
        assert!(task.transition(RepairStatus::Success).is_err());
        assert_eq!(task.status, RepairStatus::Pending);
    }

    #[test]
    fn test_reopen_resets_budget() {
        let mut task = new_task();
        task.transition(RepairStatus::Repairing).unwrap();
        task.attempts = 3;
        task.error = Some("boom".into());
        task.transition(RepairStatus::Unrepairable).unwrap();
        task.reopen();
        assert_eq!(task.status, RepairStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&RepairStatus::Unrepairable).unwrap();
        assert_eq!(json, r#""unrepairable""#);
    }

    #[test]
    fn test_normalize_hash() {
        assert_eq!(normalize_hash("  SHA256:AbC "), "abc");
        assert_eq!(normalize_hash("deadBEEF"), "deadbeef");
    }
}
