//! # Stage: Historical Context Retriever
//!
//! ## Responsibility
//! Find the past incidents most similar to the current anomaly, restricted to
//! incidents dated on or before the run's cutoff date.
//!
//! ## Guarantees
//! - Temporal non-leakage: the cutoff is passed to the index as a filter, so
//!   it is applied before ranking and never after
//! - Degradation, not failure: an embedding error falls back to the hash
//!   embedding; an index error yields an empty result with `degraded = true`
//! - Similarity is `1 / (1 + distance)`, so always in `(0, 1]`
//!
//! ## NOT Responsible For
//! - Adding incidents to the run's evidence (explain and validate render them)
//! - Populating the index

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::model::{AnalysisWindow, Anomaly, HistoricalIncident};
use crate::ports::embedding::{Embedder, HashEmbedder};
use crate::ports::index::{IncidentIndex, IndexFilter, IndexHit};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOutcome {
    pub incidents: Vec<HistoricalIncident>,
    /// The index query failed; `incidents` is empty.
    pub degraded: bool,
    /// The embedding port failed and the hash embedding was used instead.
    pub embedding_fallback: bool,
}

pub struct HistoricalRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn IncidentIndex>,
    top_k: usize,
}

impl HistoricalRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn IncidentIndex>, top_k: usize) -> Self {
        Self { embedder, index, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Query text for an anomaly: `"{channel} {metric} {direction}"`.
    pub fn query_text(anomaly: &Anomaly) -> String {
        format!("{} {} {}", anomaly.channel, anomaly.metric, anomaly.direction)
    }

    /// Cutoff preference: window end, then the anomaly's detection date, then today.
    pub fn resolve_cutoff(window: Option<&AnalysisWindow>, anomaly: Option<&Anomaly>) -> NaiveDate {
        window
            .map(|w| w.end)
            .or_else(|| anomaly.map(|a| a.detected_at))
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Context for `anomaly` as of `cutoff`, using the configured `top_k`.
    pub async fn for_anomaly(&self, anomaly: &Anomaly, cutoff: NaiveDate) -> RetrievalOutcome {
        self.retrieve(&Self::query_text(anomaly), cutoff, self.top_k).await
    }

    pub async fn retrieve(&self, query: &str, cutoff: NaiveDate, k: usize) -> RetrievalOutcome {
        let (vector, embedding_fallback) = match self.embedder.embed(query).await {
            Ok(v) => (v, false),
            Err(e) => {
                warn!(error = %e, "embedding unavailable; using hash embedding");
                (HashEmbedder::new(self.embedder.dimension()).vector(query), true)
            }
        };

        let filter = IndexFilter { date_max: cutoff };
        match self.index.query(&vector, k, &filter).await {
            Ok(hits) => {
                let incidents: Vec<HistoricalIncident> = hits
                    .into_iter()
                    // The filter is the guarantee; this drop only guards a misbehaving index.
                    .filter(|h| h.record.date <= cutoff)
                    .map(to_incident)
                    .collect();
                debug!(query, %cutoff, k, found = incidents.len(), "historical context retrieved");
                RetrievalOutcome { incidents, degraded: false, embedding_fallback }
            }
            Err(e) => {
                warn!(error = %e, %cutoff, "incident index unavailable; continuing without context");
                RetrievalOutcome { incidents: Vec::new(), degraded: true, embedding_fallback }
            }
        }
    }
}

fn to_incident(hit: IndexHit) -> HistoricalIncident {
    let r = hit.record;
    HistoricalIncident {
        incident_id: r.incident_id,
        date: r.date,
        channel: r.channel,
        anomaly_type: r.anomaly_type,
        severity: r.severity,
        root_cause: r.root_cause,
        resolution: r.resolution,
        similarity_score: 1.0 / (1.0 + hit.distance.max(0.0)),
    }
}

/// Markdown block listing retrieved incidents, or an empty string when none.
pub fn render_context(incidents: &[HistoricalIncident]) -> String {
    if incidents.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Historical Context\n");
    for (i, inc) in incidents.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} {} ({}, similarity {:.2})\n   Root cause: {}\n   Resolution: {}\n",
            i + 1,
            inc.date,
            inc.channel,
            inc.anomaly_type,
            inc.severity,
            inc.similarity_score,
            inc.root_cause,
            inc.resolution
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortError;
    use crate::model::{Direction, Severity};
    use crate::ports::index::{InMemoryIncidentIndex, IncidentRecord};
    use async_trait::async_trait;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(id: &str, date: &str, cause: &str) -> IncidentRecord {
        IncidentRecord {
            incident_id: id.into(),
            date: d(date),
            channel: "meta_ads".into(),
            anomaly_type: "cpa_spike".into(),
            severity: Severity::High,
            root_cause: cause.into(),
            resolution: "bids lowered".into(),
        }
    }

    fn anomaly() -> Anomaly {
        Anomaly {
            id: "meta_ads:cpa:2025-01-15".into(),
            channel: "meta_ads".into(),
            metric: "cpa".into(),
            current_value: 75.0,
            expected_value: 45.0,
            deviation_pct: 66.7,
            z_score: 6.0,
            severity: Severity::Critical,
            direction: Direction::Spike,
            detected_at: d("2025-01-15"),
            analysis_window: AnalysisWindow::new(d("2025-01-01"), d("2025-01-15")).unwrap(),
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            128
        }
        async fn embed(&self, _: &str) -> Result<Vec<f32>, PortError> {
            Err(PortError::unavailable("embedding", "offline"))
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl IncidentIndex for FailingIndex {
        async fn query(&self, _: &[f32], _: usize, _: &IndexFilter) -> Result<Vec<IndexHit>, PortError> {
            Err(PortError::unavailable("index", "down"))
        }
    }

    async fn retriever(records: Vec<IncidentRecord>) -> HistoricalRetriever {
        let embedder = Arc::new(HashEmbedder::new(128));
        let index = InMemoryIncidentIndex::build(records, embedder.as_ref()).await;
        HistoricalRetriever::new(embedder, Arc::new(index), 3)
    }

    #[test]
    fn test_query_text_format() {
        assert_eq!(HistoricalRetriever::query_text(&anomaly()), "meta_ads cpa spike");
    }

    #[test]
    fn test_cutoff_preference_order() {
        let a = anomaly();
        let w = AnalysisWindow::new(d("2025-01-01"), d("2025-01-10")).unwrap();
        assert_eq!(HistoricalRetriever::resolve_cutoff(Some(&w), Some(&a)), d("2025-01-10"));
        assert_eq!(HistoricalRetriever::resolve_cutoff(None, Some(&a)), d("2025-01-15"));
        assert_eq!(HistoricalRetriever::resolve_cutoff(None, None), Utc::now().date_naive());
    }

    #[tokio::test]
    async fn test_future_incidents_are_never_returned() {
        let r = retriever(vec![
            record("past", "2024-11-02", "meta_ads cpa spike after auction change"),
            record("future", "2025-02-01", "meta_ads cpa spike after auction change"),
        ])
        .await;
        let out = r.for_anomaly(&anomaly(), d("2025-01-15")).await;
        assert!(!out.degraded);
        let ids: Vec<&str> = out.incidents.iter().map(|i| i.incident_id.as_str()).collect();
        assert_eq!(ids, vec!["past"]);
        assert!(out.incidents[0].similarity_score > 0.0 && out.incidents[0].similarity_score <= 1.0);
    }

    #[tokio::test]
    async fn test_k_limits_results() {
        let records = (0..6).map(|i| record(&format!("inc{i}"), "2024-12-01", "meta_ads cpa spike")).collect();
        let r = retriever(records).await;
        assert_eq!(r.retrieve("meta_ads cpa spike", d("2025-01-15"), 2).await.incidents.len(), 2);
        assert_eq!(r.for_anomaly(&anomaly(), d("2025-01-15")).await.incidents.len(), 3);
    }

    #[tokio::test]
    async fn test_embedding_failure_uses_hash_fallback() {
        let records = vec![record("past", "2024-11-02", "meta_ads cpa spike")];
        let index = InMemoryIncidentIndex::build(records, &FailingEmbedder).await;
        let r = HistoricalRetriever::new(Arc::new(FailingEmbedder), Arc::new(index), 3);
        let out = r.for_anomaly(&anomaly(), d("2025-01-15")).await;
        assert!(out.embedding_fallback);
        assert!(!out.degraded);
        assert_eq!(out.incidents.len(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_empty() {
        let r = HistoricalRetriever::new(Arc::new(HashEmbedder::new(128)), Arc::new(FailingIndex), 3);
        let out = r.for_anomaly(&anomaly(), d("2025-01-15")).await;
        assert!(out.degraded);
        assert!(out.incidents.is_empty());
    }

    #[test]
    fn test_render_context() {
        assert_eq!(render_context(&[]), "");
        let inc = HistoricalIncident {
            incident_id: "i1".into(),
            date: d("2024-11-02"),
            channel: "meta_ads".into(),
            anomaly_type: "cpa_spike".into(),
            severity: Severity::High,
            root_cause: "auction pressure".into(),
            resolution: "bids lowered".into(),
            similarity_score: 0.5,
        };
        let text = render_context(&[inc]);
        assert!(text.starts_with("## Historical Context"));
        assert!(text.contains("Root cause: auction pressure"));
        assert!(text.contains("similarity 0.50"));
    }
}
