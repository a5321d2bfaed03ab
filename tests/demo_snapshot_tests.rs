//! The bundled demo snapshot loads, scans and runs offline.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use expedition::cli::resolve_window;
use expedition::config::ExpeditionConfig;
use expedition::model::{Direction, Severity};
use expedition::pipeline::{Orchestrator, Ports, RunStatus};
use expedition::ports::{HashEmbedder, InMemoryIncidentIndex, MetricStore, ModelTiers, SnapshotStore};

fn demo_store() -> SnapshotStore {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/snapshot.json");
    SnapshotStore::load(&path).unwrap()
}

#[test]
fn test_demo_snapshot_loads_and_spans_thirty_days() {
    let store = demo_store();
    assert!(store.health());
    assert_eq!(store.latest_date(), NaiveDate::from_ymd_opt(2025, 1, 15));
    assert_eq!(store.list_channels(), vec!["google_search", "influencer_campaigns", "meta_ads", "tv"]);
    assert_eq!(store.incidents().len(), 6);
}

#[test]
fn test_demo_scan_flags_meta_and_tv_only() {
    let store = demo_store();
    let window = resolve_window(None, None, store.latest_date()).unwrap();
    let anomalies = expedition::scanner::Scanner::default().scan_all(&store, &window);

    assert!(!anomalies.is_empty());
    assert!(anomalies.iter().all(|a| a.channel == "meta_ads" || a.channel == "tv"), "{anomalies:?}");
    let cpa = anomalies.iter().find(|a| a.channel == "meta_ads" && a.metric == "cpa").unwrap();
    assert_eq!(cpa.direction, Direction::Spike);
    assert_eq!(cpa.severity, Severity::Critical);
    assert!(anomalies.iter().any(|a| a.channel == "tv" && a.metric == "conversions" && a.direction == Direction::Drop));
}

#[tokio::test]
async fn test_demo_runs_offline_without_a_model() {
    let store = Arc::new(demo_store());
    let config = ExpeditionConfig::default();
    let window = resolve_window(None, None, store.latest_date()).unwrap();
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
    let ctx = Orchestrator::new(ports, &config).run_diagnosis(None, window).await.unwrap();

    assert!(matches!(ctx.status, RunStatus::Completed { validation_passed: false, .. }));
    assert!(!ctx.actions.is_empty());
    assert!(ctx.incidents.iter().all(|i| i.date <= window.end));
    assert!(ctx.incidents.iter().all(|i| i.incident_id != "INC-2025-004"));
}
