//! JSON snapshot data source.
//!
//! One file carries everything the engine reads: metric rows, campaign rows,
//! market and strategy feeds, and the incident corpus. [`SnapshotStore`]
//! serves all three data-source ports from it.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::index::IncidentRecord;
use super::sources::*;
use crate::error::{ExpeditionError, PortError, Result};
use crate::model::{AnalysisWindow, MetricPoint, MetricSeries};

/// One day of one channel; every other numeric field is a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub date: NaiveDate,
    pub channel: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDay {
    pub date: NaiveDate,
    pub channel: String,
    pub campaign: String,
    pub spend: f64,
    #[serde(default)]
    pub conversions: f64,
    #[serde(default)]
    pub revenue: f64,
}

fn default_healthy() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Absent means "refreshed when loaded".
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub metrics: Vec<MetricRow>,
    #[serde(default)]
    pub campaigns: Vec<CampaignDay>,
    #[serde(default)]
    pub competitor_signals: Vec<CompetitorSignal>,
    #[serde(default)]
    pub market_trend: Vec<TrendPoint>,
    #[serde(default)]
    pub saturation: Vec<SaturationSignal>,
    #[serde(default)]
    pub attribution: Vec<AttributionComparison>,
    #[serde(default)]
    pub incidents: Vec<IncidentRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            refreshed_at: None,
            healthy: true,
            metrics: Vec::new(),
            campaigns: Vec::new(),
            competitor_signals: Vec::new(),
            market_trend: Vec::new(),
            saturation: Vec::new(),
            attribution: Vec::new(),
            incidents: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Merge a series into the metric rows.
    pub fn push_series(&mut self, series: &MetricSeries) {
        for p in &series.points {
            match self
                .metrics
                .iter_mut()
                .find(|r| r.date == p.date && r.channel == series.channel)
            {
                Some(row) => {
                    row.values.insert(series.metric.clone(), p.value);
                }
                None => self.metrics.push(MetricRow {
                    date: p.date,
                    channel: series.channel.clone(),
                    values: BTreeMap::from([(series.metric.clone(), p.value)]),
                }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

pub struct SnapshotStore {
    snapshot: Snapshot,
    loaded_at: DateTime<Utc>,
    /// (channel, metric) → points sorted by date.
    series: BTreeMap<(String, String), Vec<MetricPoint>>,
}

impl SnapshotStore {
    pub fn new(snapshot: Snapshot) -> Self {
        let mut series: BTreeMap<(String, String), Vec<MetricPoint>> = BTreeMap::new();
        for row in &snapshot.metrics {
            for (metric, value) in &row.values {
                series
                    .entry((row.channel.clone(), metric.clone()))
                    .or_default()
                    .push(MetricPoint::new(row.date, *value));
            }
        }
        for points in series.values_mut() {
            points.sort_by_key(|p| p.date);
        }
        Self { snapshot, loaded_at: Utc::now(), series }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(raw)?;
        Ok(Self::new(snapshot))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ExpeditionError::io(path.display().to_string(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn incidents(&self) -> &[IncidentRecord] {
        &self.snapshot.incidents
    }

    /// Newest metric date in the snapshot.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.series.values().filter_map(|pts| pts.last().map(|p| p.date)).max()
    }
}

impl MetricStore for SnapshotStore {
    fn list_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.series.keys().map(|(c, _)| c.clone()).collect();
        channels.dedup();
        channels
    }

    fn health(&self) -> bool {
        self.snapshot.healthy
    }

    fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        Some(self.snapshot.refreshed_at.unwrap_or(self.loaded_at))
    }

    fn get_series(
        &self,
        channel: &str,
        metric: &str,
        start: Option<NaiveDate>,
        end: NaiveDate,
    ) -> std::result::Result<MetricSeries, PortError> {
        if !self.snapshot.healthy {
            return Err(PortError::unavailable("metric_store", "snapshot marked unhealthy"));
        }
        let points = self
            .series
            .get(&(channel.to_string(), metric.to_string()))
            .map(|pts| {
                pts.iter()
                    .filter(|p| p.date <= end && start.map_or(true, |s| p.date >= s))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(MetricSeries::new(channel, metric, points))
    }

    fn campaign_breakdown(
        &self,
        channel: &str,
        window: &AnalysisWindow,
    ) -> std::result::Result<Vec<CampaignSummary>, PortError> {
        let mut totals: BTreeMap<&str, CampaignSummary> = BTreeMap::new();
        for day in self
            .snapshot
            .campaigns
            .iter()
            .filter(|d| d.channel == channel && window.contains(d.date))
        {
            let entry = totals.entry(day.campaign.as_str()).or_insert_with(|| CampaignSummary {
                campaign: day.campaign.clone(),
                spend: 0.0,
                conversions: 0.0,
                revenue: 0.0,
            });
            entry.spend += day.spend;
            entry.conversions += day.conversions;
            entry.revenue += day.revenue;
        }
        let mut rows: Vec<CampaignSummary> = totals.into_values().collect();
        rows.sort_by(|a, b| b.spend.total_cmp(&a.spend));
        Ok(rows)
    }
}

#[async_trait]
impl MarketSource for SnapshotStore {
    async fn competitor_signals(
        &self,
        channel: &str,
        window: &AnalysisWindow,
    ) -> std::result::Result<Vec<CompetitorSignal>, PortError> {
        Ok(self
            .snapshot
            .competitor_signals
            .iter()
            .filter(|s| s.channel == channel && window.contains(s.date))
            .cloned()
            .collect())
    }

    async fn market_trend(&self, as_of: NaiveDate, limit: usize) -> std::result::Result<Vec<TrendPoint>, PortError> {
        let mut points: Vec<TrendPoint> =
            self.snapshot.market_trend.iter().filter(|p| p.date <= as_of).copied().collect();
        points.sort_by_key(|p| p.date);
        let skip = points.len().saturating_sub(limit);
        Ok(points.split_off(skip))
    }
}

#[async_trait]
impl StrategySource for SnapshotStore {
    async fn saturation(&self, channel: &str, as_of: NaiveDate) -> std::result::Result<Option<SaturationSignal>, PortError> {
        Ok(self
            .snapshot
            .saturation
            .iter()
            .filter(|s| s.channel == channel && s.date <= as_of)
            .max_by_key(|s| s.date)
            .cloned())
    }

    async fn attribution(
        &self,
        channel: &str,
        as_of: NaiveDate,
    ) -> std::result::Result<Option<AttributionComparison>, PortError> {
        Ok(self
            .snapshot
            .attribution
            .iter()
            .filter(|a| a.channel == channel && a.date <= as_of)
            .max_by_key(|a| a.date)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    const RAW: &str = r#"{
        "metrics": [
            {"date": "2025-01-02", "channel": "meta_ads", "spend": 120.0, "cpa": 40.0},
            {"date": "2025-01-01", "channel": "meta_ads", "spend": 100.0, "cpa": 38.0},
            {"date": "2025-01-01", "channel": "tv", "spend": 900.0}
        ],
        "campaigns": [
            {"date": "2025-01-01", "channel": "meta_ads", "campaign": "prospecting", "spend": 60, "conversions": 2, "revenue": 200},
            {"date": "2025-01-02", "channel": "meta_ads", "campaign": "retargeting", "spend": 90, "conversions": 3},
            {"date": "2025-01-20", "channel": "meta_ads", "campaign": "prospecting", "spend": 500}
        ],
        "market_trend": [
            {"date": "2025-01-01", "interest": 50},
            {"date": "2025-01-02", "interest": 55},
            {"date": "2025-01-03", "interest": 70}
        ],
        "saturation": [
            {"date": "2025-01-01", "channel": "meta_ads", "saturation_point_daily": 5000, "current_daily_spend": 4000, "marginal_roas": 1.4, "recommendation": "scale"},
            {"date": "2025-01-10", "channel": "meta_ads", "saturation_point_daily": 5000, "current_daily_spend": 5200, "marginal_roas": 0.8, "recommendation": "maintain"}
        ]
    }"#;

    #[test]
    fn test_rows_are_split_into_sorted_series() {
        let store = SnapshotStore::from_json_str(RAW).unwrap();
        let s = store.get_series("meta_ads", "spend", None, d("2025-01-31")).unwrap();
        assert_eq!(s.points.len(), 2);
        assert_eq!(s.points[0].date, d("2025-01-01"));
        assert_eq!(store.list_channels(), vec!["meta_ads".to_string(), "tv".to_string()]);
    }

    #[test]
    fn test_get_series_bounds_are_inclusive() {
        let store = SnapshotStore::from_json_str(RAW).unwrap();
        let s = store.get_series("meta_ads", "cpa", Some(d("2025-01-02")), d("2025-01-02")).unwrap();
        assert_eq!(s.points, vec![MetricPoint::new(d("2025-01-02"), 40.0)]);
        assert!(store.get_series("nope", "cpa", None, d("2025-01-02")).unwrap().is_empty());
    }

    #[test]
    fn test_campaign_breakdown_stays_inside_window() {
        let store = SnapshotStore::from_json_str(RAW).unwrap();
        let w = AnalysisWindow::new(d("2025-01-01"), d("2025-01-15")).unwrap();
        let rows = store.campaign_breakdown("meta_ads", &w).unwrap();
        assert_eq!(rows[0].campaign, "retargeting");
        assert_eq!(rows[1].spend, 60.0);
    }

    #[tokio::test]
    async fn test_strategy_lookup_never_reads_the_future() {
        let store = SnapshotStore::from_json_str(RAW).unwrap();
        let early = store.saturation("meta_ads", d("2025-01-05")).await.unwrap().unwrap();
        assert_eq!(early.recommendation, SpendRecommendation::Scale);
        let late = store.saturation("meta_ads", d("2025-01-10")).await.unwrap().unwrap();
        assert_eq!(late.recommendation, SpendRecommendation::Maintain);
        assert!(store.saturation("meta_ads", d("2024-12-31")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_market_trend_keeps_latest_points_up_to_cutoff() {
        let store = SnapshotStore::from_json_str(RAW).unwrap();
        let pts = store.market_trend(d("2025-01-02"), 5).await.unwrap();
        assert_eq!(pts.len(), 2);
        let pts = store.market_trend(d("2025-01-03"), 1).await.unwrap();
        assert_eq!(pts[0].interest, 70.0);
    }

    #[test]
    fn test_unhealthy_snapshot_refuses_reads() {
        let snapshot = Snapshot { healthy: false, ..Snapshot::default() };
        let store = SnapshotStore::new(snapshot);
        assert!(!store.health());
        assert!(store.get_series("x", "cpa", None, d("2025-01-01")).is_err());
    }

    #[test]
    fn test_latest_date_spans_all_series() {
        let mut snap = Snapshot::default();
        snap.push_series(&MetricSeries::new("a", "cpa", vec![MetricPoint::new(d("2025-01-03"), 1.0)]));
        snap.push_series(&MetricSeries::new("b", "cpa", vec![MetricPoint::new(d("2025-01-09"), 1.0)]));
        assert_eq!(SnapshotStore::new(snap).latest_date(), Some(d("2025-01-09")));
        assert_eq!(SnapshotStore::new(Snapshot::default()).latest_date(), None);
    }

    #[test]
    fn test_push_series_merges_into_existing_rows() {
        let mut snap = Snapshot::default();
        snap.push_series(&MetricSeries::new("meta_ads", "cpa", vec![MetricPoint::new(d("2025-01-01"), 1.0)]));
        snap.push_series(&MetricSeries::new("meta_ads", "spend", vec![MetricPoint::new(d("2025-01-01"), 2.0)]));
        assert_eq!(snap.metrics.len(), 1);
        assert_eq!(snap.metrics[0].values.len(), 2);
    }
}
