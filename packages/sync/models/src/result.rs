//! Per-operation outcomes, the aggregate run result, and history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{
    ConfigSummary, ErrorCode, ErrorReport, OperationKind, PlannedOperation, RateLimitInfo,
    SyncStage,
};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failed,
    Skipped,
}

/// What happened to one planned mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub row_reference: String,
    pub variant_id: String,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Why a source row produced no planned operation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnmatchedReason {
    MissingPrice,
    MissingStock,
    InvalidPrice,
    InvalidStock,
    MappingOutOfRange,
    NoMatch,
    VariantMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedRow {
    pub row_number: u64,
    pub sku: String,
    pub name: String,
    pub reason: UnmatchedReason,
}

/// Terminal classification of a run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
    DryRun,
}

/// Aggregate record of one run.
///
/// Created when the run starts, filled as stages complete, and finalized
/// exactly once, including on failure or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub run_id: String,
    pub status: RunStatus,
    /// Last stage the run reached.
    pub stage: SyncStage,
    pub dry_run: bool,
    pub total_rows: u64,
    pub total_matched: u64,
    pub total_planned: u64,
    pub total_executed: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
    pub operations: Vec<OperationResult>,
    pub planned: Vec<PlannedOperation>,
    pub unmatched: Vec<UnmatchedRow>,
    /// Last rate-limit usage observed during the run.
    pub rate_limit: Option<RateLimitInfo>,
    pub error: Option<ErrorReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl SyncResult {
    #[must_use]
    pub fn start(run_id: &str, dry_run: bool) -> Self {
        Self {
            run_id: run_id.to_owned(),
            status: RunStatus::Running,
            stage: SyncStage::Idle,
            dry_run,
            total_rows: 0,
            total_matched: 0,
            total_planned: 0,
            total_executed: 0,
            total_success: 0,
            total_failed: 0,
            total_skipped: 0,
            operations: Vec::new(),
            planned: Vec::new(),
            unmatched: Vec::new(),
            rate_limit: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
        }
    }

    pub fn set_planned(&mut self, planned: Vec<PlannedOperation>) {
        self.total_planned = planned.len() as u64;
        self.planned = planned;
    }

    /// Appends an operation outcome and updates the counters.
    pub fn record(&mut self, op: OperationResult) {
        match op.status {
            OperationStatus::Success => {
                self.total_executed += 1;
                self.total_success += 1;
            }
            OperationStatus::Failed => {
                self.total_executed += 1;
                self.total_failed += 1;
            }
            OperationStatus::Skipped => self.total_skipped += 1,
        }
        self.operations.push(op);
    }

    pub fn record_all(&mut self, ops: impl IntoIterator<Item = OperationResult>) {
        for op in ops {
            self.record(op);
        }
    }

    /// Stamps the end time and derives the terminal status.
    pub fn finalize(&mut self, error: Option<ErrorReport>) {
        let finished = Utc::now();
        self.duration_ms = u64::try_from((finished - self.started_at).num_milliseconds())
            .unwrap_or_default();
        self.finished_at = Some(finished);

        self.status = match &error {
            Some(e) if e.code == ErrorCode::SyncCancelled => RunStatus::Cancelled,
            Some(_) => RunStatus::Failed,
            None if self.dry_run => RunStatus::DryRun,
            None if self.total_failed > 0 && self.total_success > 0 => RunStatus::PartialSuccess,
            None if self.total_failed > 0 => RunStatus::Failed,
            None => RunStatus::Success,
        };
        self.error = error;
    }

    #[must_use]
    pub const fn is_partial_success(&self) -> bool {
        self.total_failed > 0 && self.total_success > 0
    }
}

// ── History ─────────────────────────────────────────────────────────

/// One past run as stored by a history sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_file_name: String,
    pub result: SyncResult,
    pub config_summary: ConfigSummary,
}

impl HistoryEntry {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(
            self.result.status,
            RunStatus::Success | RunStatus::PartialSuccess | RunStatus::DryRun
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(status: OperationStatus) -> OperationResult {
        OperationResult {
            kind: OperationKind::Price,
            row_reference: "row 2".to_string(),
            variant_id: "v1".to_string(),
            status,
            old_value: None,
            new_value: None,
            message: None,
            error_code: None,
        }
    }

    #[test]
    fn counters_follow_recorded_outcomes() {
        let mut result = SyncResult::start("run", false);
        result.record(op(OperationStatus::Success));
        result.record(op(OperationStatus::Failed));
        result.record(op(OperationStatus::Skipped));
        assert_eq!(result.total_executed, 2);
        assert_eq!(result.total_success, 1);
        assert_eq!(result.total_failed, 1);
        assert_eq!(result.total_skipped, 1);
        assert!(result.is_partial_success());

        result.finalize(None);
        assert_eq!(result.status, RunStatus::PartialSuccess);
        assert!(result.finished_at.is_some());
    }

    #[test]
    fn cancellation_and_failure_statuses() {
        let mut cancelled = SyncResult::start("a", false);
        cancelled.finalize(Some(ErrorReport::new(ErrorCode::SyncCancelled, "stop")));
        assert_eq!(cancelled.status, RunStatus::Cancelled);

        let mut failed = SyncResult::start("b", false);
        failed.finalize(Some(ErrorReport::new(ErrorCode::RemoteUnauthorized, "no")));
        assert_eq!(failed.status, RunStatus::Failed);

        let mut dry = SyncResult::start("c", true);
        dry.finalize(None);
        assert_eq!(dry.status, RunStatus::DryRun);
    }
}
