use std::sync::Arc;

use clap::Parser;
use colored::*;

use expedition::batch::{BatchReport, BatchRunner};
use expedition::cli::{resolve_window, Args, Command};
use expedition::config::ExpeditionConfig;
use expedition::gate::lock_report;
use expedition::model::{Anomaly, Severity};
use expedition::pipeline::{Orchestrator, Ports, RunContext, RunStatus};
use expedition::ports::{DryRunExecutor, Executor, HashEmbedder, InMemoryIncidentIndex, ModelTiers, SnapshotStore};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn severity_label(s: Severity) -> ColoredString {
    match s {
        Severity::Critical => s.to_string().bright_red().bold(),
        Severity::High => s.to_string().red(),
        Severity::Medium => s.to_string().yellow(),
        Severity::Low => s.to_string().normal(),
    }
}

fn print_anomalies(anomalies: &[Anomaly]) {
    if anomalies.is_empty() {
        println!("{}", "No anomalies found.".bright_green());
        return;
    }
    println!("{}", format!("{} anomalies", anomalies.len()).bright_blue().bold());
    for a in anomalies {
        println!(
            "  [{}] {} {} {}: {:.2} vs expected {:.2} ({:+.1}%, z={:.2}) on {}",
            severity_label(a.severity),
            a.channel.bright_white(),
            a.metric,
            a.direction,
            a.current_value,
            a.expected_value,
            a.deviation_pct,
            a.z_score,
            a.detected_at
        );
    }
}

fn print_run(ctx: &RunContext, executor: &DryRunExecutor) {
    println!("{}", "=".repeat(60).bright_blue());
    let status = match &ctx.status {
        RunStatus::Completed { validation_passed: true, .. } => ctx.status.to_string().bright_green(),
        RunStatus::Completed { .. } => ctx.status.to_string().yellow(),
        RunStatus::NoSignal => ctx.status.to_string().bright_green(),
        RunStatus::Aborted { .. } | RunStatus::Running => ctx.status.to_string().bright_red(),
    };
    println!("{}: {} {}", "Run".bright_yellow(), ctx.run_id, if ctx.from_cache { "(cached)" } else { "" });
    println!("{}: {}", "Window".bright_yellow(), ctx.window);
    println!("{}: {}", "Status".bright_yellow(), status);
    let trace: Vec<String> = ctx.stage_trace.iter().map(|s| s.to_string()).collect();
    println!("{}: {}", "Stages".bright_yellow(), trace.join(" → "));

    if let Some(a) = &ctx.selected {
        println!("{}: {}", "Anomaly".bright_yellow(), a.headline());
    }
    if !ctx.degradations.is_empty() {
        println!("{}: {}", "Degraded".bright_red(), ctx.degradations.join(", "));
    }
    if !ctx.incidents.is_empty() {
        println!("{}", "Similar past incidents:".bright_yellow());
        for inc in &ctx.incidents {
            println!("  {} {} ({:.2}): {}", inc.date, inc.channel, inc.similarity_score, inc.root_cause);
        }
    }
    if let Some(d) = &ctx.diagnosis {
        println!("{}", "-".repeat(60).bright_blue());
        println!("{}: {}", "Root cause".bright_green(), d.root_cause);
        println!("{}: {}  {}: {:.2}", "Category".bright_yellow(), d.root_cause_category, "Confidence".bright_yellow(), d.confidence);
        for e in &d.supporting_evidence {
            println!("  • {e}");
        }
        if !d.summaries.executive.is_empty() {
            println!("{}: {}", "Executive".bright_yellow(), d.summaries.executive);
        }
    }
    if let Some(v) = &ctx.validation {
        let locks: Vec<String> = lock_report(v).iter().map(|(name, status)| format!("{name}={status}")).collect();
        println!("{}: risk {:.2}, {}", "Validation".bright_yellow(), v.hallucination_risk, locks.join(" "));
        for issue in &v.issues {
            println!("  {} {issue}", "!".yellow());
        }
    }
    if !ctx.actions.is_empty() {
        println!("{}", "Proposed actions (dry run):".bright_green());
        for action in &ctx.actions {
            let line = match executor.validate(action) {
                Ok(()) => executor.preview(action),
                Err(reason) => format!("{} (invalid: {reason})", action.operation),
            };
            println!("  [{}] {}", action.action_key.to_string().bright_white(), line);
            println!("      {}", action.rationale.dimmed());
        }
    }
    println!("{}", "=".repeat(60).bright_blue());
}

fn print_batch(report: &BatchReport) {
    println!("{}", report.to_markdown());
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => ExpeditionConfig::load(path)?,
        None => ExpeditionConfig::default(),
    };
    if let Some(provider) = args.provider {
        config.llm.provider = provider;
    }
    config.apply_env(|key| std::env::var(key).ok())?;

    let store = Arc::new(SnapshotStore::load(&args.snapshot)?);
    let window = resolve_window(args.start, args.end, store.latest_date())?;

    let embedder = Arc::new(HashEmbedder::new(config.retrieval.embedding_dimension));
    let index = InMemoryIncidentIndex::build(store.incidents().to_vec(), embedder.as_ref()).await;
    let ports = Ports {
        store: store.clone(),
        market: store.clone(),
        strategy: store.clone(),
        tiers: ModelTiers::from_config(&config.llm),
        embedder,
        index: Arc::new(index),
    };
    let orchestrator = Arc::new(Orchestrator::new(ports, &config));

    match args.command {
        Command::Scan { channel } => {
            let anomalies = match channel {
                Some(c) => orchestrator.scanner().scan_one(store.as_ref(), &c, &window),
                None => orchestrator.scanner().scan_all(store.as_ref(), &window),
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&anomalies)?);
            } else {
                println!("{}: {}", "Window".bright_yellow(), window);
                print_anomalies(&anomalies);
            }
        }
        Command::Diagnose { channel, metric } => {
            let pinned = match (channel, metric) {
                (Some(c), Some(m)) => {
                    let found = orchestrator
                        .scanner()
                        .scan_one(store.as_ref(), &c, &window)
                        .into_iter()
                        .find(|a| a.metric == m);
                    if found.is_none() {
                        eprintln!("{}", format!("No anomaly on {c}/{m} in {window}.").yellow());
                        return Ok(());
                    }
                    found
                }
                _ => None,
            };
            let ctx = orchestrator.run_diagnosis(pinned, window).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&ctx)?);
            } else {
                print_run(&ctx, &DryRunExecutor::new());
            }
        }
        Command::Batch { output, max_anomalies, concurrency } => {
            let mut batch_config = config.batch.clone();
            if let Some(n) = max_anomalies {
                batch_config.max_anomalies = n;
            }
            if let Some(n) = concurrency {
                batch_config.max_concurrent = n.max(1);
            }
            let report = BatchRunner::new(Arc::clone(&orchestrator), batch_config).run(window).await;
            if let Some(path) = &output {
                report.write_markdown(path)?;
                eprintln!("{} {}", "Report written to".bright_green(), path.display());
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if output.is_none() {
                print_batch(&report);
            }
        }
    }
    Ok(())
}
