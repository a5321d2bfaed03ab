//! Data-source ports: the metric store plus the market and strategy feeds
//! the investigators and the guardrail read.
//!
//! Every dated lookup takes an "as of" day and must never return anything
//! dated after it.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::model::{AnalysisWindow, MetricSeries};

// ---------------------------------------------------------------------------
// Metric store
// ---------------------------------------------------------------------------

/// Spend and outcome totals for one campaign over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign: String,
    pub spend: f64,
    pub conversions: f64,
    pub revenue: f64,
}

impl CampaignSummary {
    pub fn cpa(&self) -> Option<f64> {
        (self.conversions > 0.0).then(|| self.spend / self.conversions)
    }

    pub fn roas(&self) -> Option<f64> {
        (self.spend > 0.0).then(|| self.revenue / self.spend)
    }
}

/// Read-only source of per-channel metric history.
///
/// Synchronous: the store is a snapshot and scanning it is a pure function.
pub trait MetricStore: Send + Sync {
    fn list_channels(&self) -> Vec<String>;

    fn health(&self) -> bool;

    /// When the underlying data was last refreshed, if known.
    fn last_refreshed(&self) -> Option<DateTime<Utc>>;

    /// Points for `channel`/`metric` with `start ≤ date ≤ end`; an open start
    /// means "from the beginning". Absent channels yield an empty series.
    fn get_series(
        &self,
        channel: &str,
        metric: &str,
        start: Option<NaiveDate>,
        end: NaiveDate,
    ) -> Result<MetricSeries, PortError>;

    /// Campaign totals inside `window`, largest spend first.
    fn campaign_breakdown(&self, _channel: &str, _window: &AnalysisWindow) -> Result<Vec<CampaignSummary>, PortError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Market feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSignal {
    pub date: NaiveDate,
    pub channel: String,
    pub competitor: String,
    /// e.g. `impression_share_gain`, `new_brand_bidding`.
    pub signal: String,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub interest: f64,
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Competitor events on `channel` dated inside `window`.
    async fn competitor_signals(&self, channel: &str, window: &AnalysisWindow) -> Result<Vec<CompetitorSignal>, PortError>;

    /// The most recent `limit` market-interest points dated on or before `as_of`.
    async fn market_trend(&self, as_of: NaiveDate, limit: usize) -> Result<Vec<TrendPoint>, PortError>;
}

// ---------------------------------------------------------------------------
// Strategy feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendRecommendation {
    Scale,
    Maintain,
    Reduce,
}

impl std::fmt::Display for SpendRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpendRecommendation::Scale    => write!(f, "scale"),
            SpendRecommendation::Maintain => write!(f, "maintain"),
            SpendRecommendation::Reduce   => write!(f, "reduce"),
        }
    }
}

/// Media-mix-model view of a channel's response curve on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturationSignal {
    pub date: NaiveDate,
    pub channel: String,
    pub saturation_point_daily: f64,
    pub current_daily_spend: f64,
    pub marginal_roas: f64,
    pub recommendation: SpendRecommendation,
}

/// Platform-reported versus modelled return for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionComparison {
    pub date: NaiveDate,
    pub channel: String,
    pub platform_roas: f64,
    pub mmm_roas: f64,
    pub mta_roas: f64,
}

#[async_trait]
pub trait StrategySource: Send + Sync {
    /// Latest saturation signal for `channel` dated on or before `as_of`.
    async fn saturation(&self, channel: &str, as_of: NaiveDate) -> Result<Option<SaturationSignal>, PortError>;

    /// Latest attribution comparison for `channel` dated on or before `as_of`.
    async fn attribution(&self, channel: &str, as_of: NaiveDate) -> Result<Option<AttributionComparison>, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_ratios_guard_zero_denominators() {
        let c = CampaignSummary { campaign: "c".into(), spend: 100.0, conversions: 0.0, revenue: 0.0 };
        assert!(c.cpa().is_none());
        assert_eq!(c.roas(), Some(0.0));
        let z = CampaignSummary { campaign: "z".into(), spend: 0.0, conversions: 2.0, revenue: 10.0 };
        assert_eq!(z.cpa(), Some(0.0));
        assert!(z.roas().is_none());
    }

    #[test]
    fn test_recommendation_serde_is_snake_case() {
        let r: SpendRecommendation = serde_json::from_str("\"maintain\"").unwrap();
        assert_eq!(r, SpendRecommendation::Maintain);
        assert_eq!(r.to_string(), "maintain");
    }
}
