//! Plain-text rendering of previews, plans, results, and history.

use std::fmt::Write as _;

use stock_sync_models::{
    HistoryEntry, HistoryStats, OperationStatus, PlannedOperation, SyncResult,
};
use stock_sync_source::SourcePreview;
use stock_sync_source::columns::index_to_letter;

/// Unmatched rows listed before the rest are summarized.
const MAX_UNMATCHED_LISTED: usize = 20;

/// Failed operations listed before the rest are summarized.
const MAX_FAILURES_LISTED: usize = 20;

#[must_use]
pub fn preview(preview: &SourcePreview) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} file, encoding {}{}",
        preview.kind,
        preview.encoding,
        preview
            .delimiter
            .map(|d| format!(", delimiter '{d}'"))
            .unwrap_or_default()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<8} HEADER", "COLUMN");
    let _ = writeln!(out, "{}", "-".repeat(40));
    for (i, header) in preview.headers.iter().enumerate() {
        let _ = writeln!(out, "{:<8} {header}", index_to_letter(i));
    }

    if !preview.rows.is_empty() {
        let _ = writeln!(out);
        for row in &preview.rows {
            let _ = writeln!(out, "{:<6} {}", row.row_number, row.values.join(" | "));
        }
    }
    if preview.truncated {
        let _ = writeln!(out, "...");
    }
    out
}

#[must_use]
pub fn planned(ops: &[PlannedOperation]) -> String {
    if ops.is_empty() {
        return "Nothing to update.\n".to_owned();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<14} {:<10} {:<16} {:<30} {:>12} {:>12}",
        "ID", "TYPE", "SKU", "PRODUCT", "OLD", "NEW"
    );
    let _ = writeln!(out, "{}", "-".repeat(99));
    for op in ops {
        let title = if op.variant_title.is_empty() || op.variant_title == "Default Title" {
            op.product_title.clone()
        } else {
            format!("{} / {}", op.product_title, op.variant_title)
        };
        let _ = writeln!(
            out,
            "{:<14} {:<10} {:<16} {:<30} {:>12} {:>12}",
            op.id,
            op.kind,
            op.sku,
            truncate(&title, 30),
            op.old_value
                .as_ref()
                .map_or_else(|| "-".to_owned(), ToString::to_string),
            op.new_value
        );
    }
    out
}

#[must_use]
pub fn result(result: &SyncResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {} finished: {}", result.run_id, result.status);
    let _ = writeln!(
        out,
        "  rows {}, matched {}, planned {}",
        result.total_rows, result.total_matched, result.total_planned
    );
    if !result.dry_run {
        let _ = writeln!(
            out,
            "  executed {}: {} succeeded, {} failed, {} skipped",
            result.total_executed, result.total_success, result.total_failed, result.total_skipped
        );
    }
    let _ = writeln!(out, "  took {} ms", result.duration_ms);
    if let Some(rate) = &result.rate_limit {
        let _ = writeln!(
            out,
            "  API calls used {}/{} ({:.0}%)",
            rate.used, rate.limit, rate.percentage
        );
    }
    if let Some(error) = &result.error {
        let _ = writeln!(
            out,
            "  {} [{}]: {}",
            error.severity, error.code, error.user_message
        );
    }

    let failures: Vec<_> = result
        .operations
        .iter()
        .filter(|op| op.status == OperationStatus::Failed)
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failed:");
        for op in failures.iter().take(MAX_FAILURES_LISTED) {
            let _ = writeln!(
                out,
                "  {} {}: {}",
                op.kind,
                op.row_reference,
                op.message.as_deref().unwrap_or("unknown error")
            );
        }
        if failures.len() > MAX_FAILURES_LISTED {
            let _ = writeln!(out, "  ... and {} more", failures.len() - MAX_FAILURES_LISTED);
        }
    }

    if !result.unmatched.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Unmatched rows:");
        for row in result.unmatched.iter().take(MAX_UNMATCHED_LISTED) {
            let _ = writeln!(
                out,
                "  row {:<6} {:<16} {:<30} {}",
                row.row_number,
                row.sku,
                truncate(&row.name, 30),
                row.reason
            );
        }
        if result.unmatched.len() > MAX_UNMATCHED_LISTED {
            let _ = writeln!(
                out,
                "  ... and {} more",
                result.unmatched.len() - MAX_UNMATCHED_LISTED
            );
        }
    }
    out
}

#[must_use]
pub fn history(entries: &[HistoryEntry], stats: &HistoryStats) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} run(s): {} succeeded, {} failed",
        stats.total_runs, stats.successful_runs, stats.failed_runs
    );
    if let Some(last) = stats.last_sync_at {
        let _ = writeln!(out, "Last sync: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if entries.is_empty() {
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<20} {:<16} {:<30} {:>8} {:>8} {:>8}",
        "WHEN", "STATUS", "FILE", "OK", "FAILED", "SKIPPED"
    );
    let _ = writeln!(out, "{}", "-".repeat(95));
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<20} {:<16} {:<30} {:>8} {:>8} {:>8}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.result.status,
            truncate(&entry.source_file_name, 30),
            entry.result.total_success,
            entry.result.total_failed,
            entry.result.total_skipped
        );
    }
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

#[cfg(test)]
mod tests {
    use stock_sync_models::{
        OperationKind, OperationResult, OperationValue, RunStatus, UnmatchedReason, UnmatchedRow,
    };

    use super::*;

    fn op(
        id: &str,
        kind: OperationKind,
        old: Option<OperationValue>,
        new: OperationValue,
    ) -> PlannedOperation {
        PlannedOperation {
            id: id.to_owned(),
            kind,
            sku: "W-S".to_owned(),
            product_title: "Widget".to_owned(),
            variant_title: "Small".to_owned(),
            old_value: old,
            new_value: new,
        }
    }

    #[test]
    fn planned_table_lists_each_operation() {
        let text = planned(&[
            op(
                "price-1",
                OperationKind::Price,
                Some(OperationValue::Money("10.00".to_owned())),
                OperationValue::Money("11.50".to_owned()),
            ),
            op("inventory-1", OperationKind::Inventory, None, OperationValue::Quantity(5)),
        ]);
        assert!(text.contains("price-1"));
        assert!(text.contains("Widget / Small"));
        assert!(text.contains("11.50"));
        assert!(text.lines().any(|l| l.starts_with("inventory-1") && l.contains(" - ")));
    }

    #[test]
    fn empty_plan() {
        assert_eq!(planned(&[]), "Nothing to update.\n");
    }

    #[test]
    fn result_lists_failures_and_unmatched_rows() {
        let mut result = SyncResult::start("run-1", false);
        result.record(OperationResult {
            kind: OperationKind::Price,
            row_reference: "W-S".to_owned(),
            variant_id: "v1".to_owned(),
            status: OperationStatus::Failed,
            old_value: None,
            new_value: Some("11.50".to_owned()),
            message: Some("Price must be positive".to_owned()),
            error_code: None,
        });
        result.unmatched.push(UnmatchedRow {
            row_number: 4,
            sku: "NOPE".to_owned(),
            name: "Mystery".to_owned(),
            reason: UnmatchedReason::NoMatch,
        });
        result.finalize(None);

        let text = super::result(&result);
        assert_eq!(result.status, RunStatus::Failed);
        assert!(text.contains("Price must be positive"));
        assert!(text.contains("NOPE"));
        assert!(text.contains("no_match"));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd~");
    }
}
