//! Batch diagnosis: scan every channel, then run one pinned diagnosis per
//! qualifying anomaly and collect the results into a report.
//!
//! Runs are isolated; the only thing they share is the orchestrator's run
//! cache. `max_concurrent = 1` keeps the batch strictly sequential.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::BatchConfig;
use crate::error::{ExpeditionError, Result};
use crate::model::{AnalysisWindow, Anomaly};
use crate::pipeline::{Orchestrator, RunContext, RunStatus};

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub anomaly: Anomaly,
    /// `Err` carries the run error (only a timeout reaches here).
    #[serde(with = "entry_outcome")]
    pub outcome: std::result::Result<RunContext, String>,
}

mod entry_outcome {
    use super::RunContext;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &Result<RunContext, String>, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = s.serialize_map(Some(1))?;
        match v {
            Ok(ctx) => map.serialize_entry("run", ctx)?,
            Err(e) => map.serialize_entry("error", e)?,
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub window: AnalysisWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Anomalies the scan found before filtering.
    pub scanned: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Ok(RunContext { status: RunStatus::Completed { .. }, .. })))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_err()).count()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Diagnostic Batch Report\n");
        let _ = writeln!(md, "- Window: {}", self.window);
        let _ = writeln!(md, "- Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(md, "- Anomalies scanned: {}", self.scanned);
        let _ = writeln!(md, "- Diagnosed: {} ({} completed, {} failed)\n", self.entries.len(), self.completed(), self.failed());

        let _ = writeln!(md, "| # | Anomaly | Severity | Status | Root cause | Actions |");
        let _ = writeln!(md, "|---|---------|----------|--------|------------|---------|");
        for (i, e) in self.entries.iter().enumerate() {
            let (status, cause, actions) = match &e.outcome {
                Ok(ctx) => (
                    ctx.status.to_string(),
                    ctx.diagnosis.as_ref().map(|d| d.root_cause.replace('|', "/")).unwrap_or_else(|| "-".into()),
                    ctx.actions.len().to_string(),
                ),
                Err(err) => (format!("error: {err}"), "-".into(), "0".into()),
            };
            let _ = writeln!(
                md,
                "| {} | {} {} {} ({:+.1}%) | {} | {} | {} | {} |",
                i + 1,
                e.anomaly.channel,
                e.anomaly.metric,
                e.anomaly.direction,
                e.anomaly.deviation_pct,
                e.anomaly.severity,
                status,
                cause,
                actions
            );
        }

        for (i, e) in self.entries.iter().enumerate() {
            let Ok(ctx) = &e.outcome else { continue };
            let _ = writeln!(md, "\n## {}. {}\n", i + 1, e.anomaly.headline());
            if let Some(d) = &ctx.diagnosis {
                let _ = writeln!(md, "**Root cause** ({}, confidence {:.2}): {}\n", d.root_cause_category, d.confidence, d.root_cause);
                if !d.summaries.executive.is_empty() {
                    let _ = writeln!(md, "> {}\n", d.summaries.executive);
                }
            }
            if let Some(passed) = ctx.validation_passed {
                let _ = writeln!(md, "Validation: {}", if passed { "passed" } else { "failed" });
            }
            for issue in &ctx.issues {
                let _ = writeln!(md, "- issue: {issue}");
            }
            if !ctx.degradations.is_empty() {
                let _ = writeln!(md, "Degraded: {}", ctx.degradations.join(", "));
            }
            if !ctx.actions.is_empty() {
                let _ = writeln!(md, "\nProposed actions:");
                for a in &ctx.actions {
                    let approval = if a.requires_approval { " (approval required)" } else { "" };
                    let _ = writeln!(md, "- `{}` {} on {} [{} risk]{approval}", a.action_key, a.operation, a.platform, a.risk_level);
                }
            }
        }
        md
    }

    pub fn write_markdown(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_markdown()).map_err(|e| ExpeditionError::io(path.display().to_string(), e))
    }
}

/// Anomalies at or above `min_severity`, most severe first, capped at
/// `max_anomalies`. Input order breaks ties.
pub fn select_anomalies(mut anomalies: Vec<Anomaly>, config: &BatchConfig) -> Vec<Anomaly> {
    anomalies.retain(|a| a.severity >= config.min_severity);
    anomalies.sort_by_key(|a| std::cmp::Reverse(a.severity));
    anomalies.truncate(config.max_anomalies);
    anomalies
}

pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, config: BatchConfig) -> Self {
        Self { orchestrator, config }
    }

    pub async fn run(&self, window: AnalysisWindow) -> BatchReport {
        let started_at = Utc::now();
        let scanned = self.orchestrator.scanner().scan_all(self.orchestrator.store(), &window);
        let total = scanned.len();
        let selected = select_anomalies(scanned, &self.config);
        info!(%window, scanned = total, selected = selected.len(), max_concurrent = self.config.max_concurrent, "batch started");

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let runs = selected.into_iter().map(|anomaly| {
            let permits = Arc::clone(&permits);
            let orchestrator = Arc::clone(&self.orchestrator);
            async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => orchestrator
                        .run_diagnosis(Some(anomaly.clone()), window)
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(e) = &outcome {
                    warn!(anomaly_id = %anomaly.id, error = %e, "batch run failed");
                }
                BatchEntry { anomaly, outcome }
            }
        });
        let entries = join_all(runs).await;

        let report = BatchReport { window, started_at, finished_at: Utc::now(), scanned: total, entries };
        info!(completed = report.completed(), failed = report.failed(), "batch finished");
        report
    }
}
