//! Incident vector index port and an in-memory implementation.
//!
//! The date filter is part of the query contract: implementations apply it
//! before ranking, so `k` neighbours are drawn only from eligible incidents.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::embedding::{l2_distance, Embedder, HashEmbedder};
use crate::error::PortError;
use crate::model::Severity;

/// A stored incident as ingested, before any similarity is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: String,
    pub date: NaiveDate,
    pub channel: String,
    pub anomaly_type: String,
    pub severity: Severity,
    pub root_cause: String,
    pub resolution: String,
}

impl IncidentRecord {
    /// Text that gets embedded for this incident.
    pub fn document(&self) -> String {
        format!("{} {} {}", self.channel, self.anomaly_type.replace('_', " "), self.root_cause)
    }
}

/// Hard predicates pushed into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFilter {
    /// Only incidents dated on or before this day are eligible.
    pub date_max: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub record: IncidentRecord,
    pub distance: f64,
}

#[async_trait]
pub trait IncidentIndex: Send + Sync {
    /// Up to `k` nearest eligible incidents, closest first.
    async fn query(&self, vector: &[f32], k: usize, filter: &IndexFilter) -> Result<Vec<IndexHit>, PortError>;
}

// ---------------------------------------------------------------------------
// InMemoryIncidentIndex
// ---------------------------------------------------------------------------

/// Brute-force L2 index.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIncidentIndex {
    entries: Vec<(IncidentRecord, Vec<f32>)>,
}

impl InMemoryIncidentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: IncidentRecord, vector: Vec<f32>) {
        self.entries.push((record, vector));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embed and insert every record. An embedding failure for a record
    /// falls back to the hash embedding of the same dimension.
    pub async fn build(records: Vec<IncidentRecord>, embedder: &dyn Embedder) -> Self {
        let fallback = HashEmbedder::new(embedder.dimension());
        let mut index = Self::new();
        for record in records {
            let doc = record.document();
            let vector = match embedder.embed(&doc).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, incident_id = %record.incident_id, "embedding failed; using hash embedding");
                    fallback.vector(&doc)
                }
            };
            index.insert(record, vector);
        }
        index
    }
}

#[async_trait]
impl IncidentIndex for InMemoryIncidentIndex {
    async fn query(&self, vector: &[f32], k: usize, filter: &IndexFilter) -> Result<Vec<IndexHit>, PortError> {
        let mut hits = Vec::new();
        for (record, stored) in self.entries.iter().filter(|(r, _)| r.date <= filter.date_max) {
            if stored.len() != vector.len() {
                return Err(PortError::decode(
                    "vector",
                    format!("query has {} dims, incident {} has {}", vector.len(), record.incident_id, stored.len()),
                ));
            }
            hits.push(IndexHit { record: record.clone(), distance: l2_distance(vector, stored) });
        }
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.record.incident_id.cmp(&b.record.incident_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
