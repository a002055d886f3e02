//! Plain-text renderings of run results, history and workspace state.
//!
//! Everything here returns a `String`; the commands decide where it goes.

use std::fmt::Write as _;

use console::style;

use crate::pipeline::{DocumentKind, ExecutionResult};
use crate::ui::icons::{CHECK, CROSS, PAUSE, RECYCLE, WARN};
use crate::workspace::{ArtifactType, ExecutionRecord, ExecutionSummary, RunStatus, WorkspaceStats};

fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => style(status.as_str()).green().to_string(),
        RunStatus::Failed => style(status.as_str()).red().to_string(),
        RunStatus::Paused => style(status.as_str()).yellow().to_string(),
        other => style(other.as_str()).dim().to_string(),
    }
}

fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < KIB * KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MiB", bytes as f64 / (KIB * KIB) as f64)
    }
}

pub fn render_result(result: &ExecutionResult) -> String {
    let mut out = String::new();
    let icon = match result.status {
        RunStatus::Completed if result.reused => RECYCLE,
        RunStatus::Completed => CHECK,
        RunStatus::Paused => PAUSE,
        _ => CROSS,
    };
    let _ = writeln!(
        out,
        "{}{} {}",
        icon,
        style(&result.project_name).bold(),
        status_label(result.status)
    );
    let _ = writeln!(out, "  execution:  {}", result.execution_id);
    let _ = writeln!(out, "  domain:     {}", result.domain);
    let _ = writeln!(out, "  score:      {:.1}/10", result.quality_score);
    let _ = writeln!(out, "  iterations: {}", result.iteration_count);
    if let Some(kind) = result.document_kind {
        let label = match kind {
            DocumentKind::Specification => "requirements specification",
            DocumentKind::QualityReport => "quality problem report",
        };
        let _ = writeln!(out, "  document:   {}", label);
    }
    let elapsed = result.completed_at - result.started_at;
    let _ = writeln!(out, "  duration:   {}s", elapsed.num_seconds().max(0));
    if result.reused {
        let _ = writeln!(
            out,
            "  {}",
            style("reused a recent run with identical inputs (pass --fresh to rerun)").dim()
        );
    }
    if let Some(err) = &result.error_message {
        let _ = writeln!(out, "  error:      {}", style(err).red());
    }

    if !result.issues.is_empty() {
        let issues: Vec<String> = result
            .issues
            .iter()
            .map(|i| i.severity.as_str().to_string())
            .collect();
        let _ = writeln!(out, "  issues:     {}", issues.join(", "));
    }

    out.push_str("\n  Artifacts\n");
    for (ty, size) in result.artifact_summary() {
        match size {
            Some(size) => {
                let _ = writeln!(out, "    {:<28} {}", ty.title(), human_size(size as u64));
            }
            None => {
                let _ = writeln!(out, "    {:<28} {}", ty.title(), style("-").dim());
            }
        }
    }

    for warning in &result.warnings {
        let _ = writeln!(out, "{}{}", WARN, style(warning).yellow());
    }
    out
}

pub fn render_history(records: &[ExecutionRecord]) -> String {
    if records.is_empty() {
        return "No runs recorded yet.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36}  {:<10}  {:>5}  {:>4}  {}",
        "EXECUTION", "STATUS", "SCORE", "ITER", "STARTED"
    );
    for r in records {
        // Pad before styling so escape codes do not skew the columns.
        let status = format!("{:<10}", r.status.as_str());
        let status = match r.status {
            RunStatus::Completed => style(status).green().to_string(),
            RunStatus::Failed => style(status).red().to_string(),
            RunStatus::Paused => style(status).yellow().to_string(),
            _ => status,
        };
        let _ = writeln!(
            out,
            "{:<36}  {}  {:>5.1}  {:>4}  {}",
            r.execution_id,
            status,
            r.quality_score,
            r.iteration_count,
            r.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    out
}

pub fn render_summary(summary: &ExecutionSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Execution {}", style(&summary.execution_id).bold());
    let phases = if summary.phases_completed.is_empty() {
        "none".to_string()
    } else {
        summary.phases_completed.join(" → ")
    };
    let _ = writeln!(out, "  phases:    {}", phases);
    let _ = writeln!(out, "  artifacts: {}", summary.total_artifacts);
    for ty in ArtifactType::ALL {
        if let Some(s) = summary.artifacts.get(&ty) {
            let _ = writeln!(
                out,
                "    {:<28} v{:<3} {:<10} {} ({} stored)",
                ty.title(),
                s.latest_version,
                s.latest_status.as_str(),
                s.latest_creator,
                s.count
            );
        }
    }
    out
}

pub fn render_stats(stats: &WorkspaceStats) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Workspace: {} artifacts, {}",
        stats.total_artifacts,
        human_size(stats.storage_bytes)
    );
    for (label, counts) in [
        ("by type", &stats.by_type),
        ("by status", &stats.by_status),
        ("by creator", &stats.by_creator),
    ] {
        if counts.is_empty() {
            continue;
        }
        let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let _ = writeln!(out, "  {:<11} {}", label, parts.join(" "));
    }
    out
}
