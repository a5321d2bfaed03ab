//! Core data model shared by every stage.
//!
//! Everything here is plain data: created by one stage, read by the ones
//! downstream, never mutated in place.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metric series
// ---------------------------------------------------------------------------

/// One dated observation of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Ordered (date ascending) observations of one metric on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub channel: String,
    pub metric: String,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Build a series, sorting the points by date.
    pub fn new(channel: impl Into<String>, metric: impl Into<String>, mut points: Vec<MetricPoint>) -> Self {
        points.sort_by_key(|p| p.date);
        Self { channel: channel.into(), metric: metric.into(), points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Analysis window
// ---------------------------------------------------------------------------

/// Inclusive date range a run analyses. `end` is the "as of" date: nothing
/// dated after it may influence the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AnalysisWindow {
    /// Returns `None` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Window of `days` days ending on `end` (inclusive).
    pub fn ending(end: NaiveDate, days: i64) -> Self {
        Self { start: end - Duration::days(days.max(1) - 1), end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Severity + Direction
// ---------------------------------------------------------------------------

/// Severity level of a detected anomaly, ordered low → critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Band a z-score: `|z| ≥ 4` critical, `≥ 3` high, `≥ 2.5` medium, else low.
    pub fn from_z(z: f64) -> Self {
        let z = z.abs();
        if z >= 4.0 {
            Severity::Critical
        } else if z >= 3.0 {
            Severity::High
        } else if z >= 2.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low      => write!(f, "low"),
            Severity::Medium   => write!(f, "medium"),
            Severity::High     => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Spike,
    Drop,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Spike => write!(f, "spike"),
            Direction::Drop  => write!(f, "drop"),
        }
    }
}

// ---------------------------------------------------------------------------
// Anomaly
// ---------------------------------------------------------------------------

/// A metric observation whose deviation from its baseline exceeded the
/// configured z-score threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Stable identity; the scanner derives it from channel, metric and date.
    pub id: String,
    pub channel: String,
    pub metric: String,
    pub current_value: f64,
    /// Baseline mean.
    pub expected_value: f64,
    pub deviation_pct: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub direction: Direction,
    pub detected_at: NaiveDate,
    pub analysis_window: AnalysisWindow,
}

impl Anomaly {
    /// Identity the scanner assigns to an anomaly on `channel`/`metric` observed at `date`.
    pub fn derive_id(channel: &str, metric: &str, date: NaiveDate) -> String {
        format!("{channel}:{metric}:{date}")
    }

    /// Short one-line description used in prompts, logs and reports.
    pub fn headline(&self) -> String {
        format!(
            "{} {} {} ({:+.1}%, z={:.2}, {})",
            self.channel, self.metric, self.direction, self.deviation_pct, self.z_score, self.severity
        )
    }
}

// ---------------------------------------------------------------------------
// Historical incidents
// ---------------------------------------------------------------------------

/// A past incident retrieved as context for the current diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalIncident {
    pub incident_id: String,
    pub date: NaiveDate,
    pub channel: String,
    pub anomaly_type: String,
    pub severity: Severity,
    pub root_cause: String,
    pub resolution: String,
    /// `1 / (1 + distance)`, in `(0, 1]`.
    pub similarity_score: f64,
}

// ---------------------------------------------------------------------------
// Channel category
// ---------------------------------------------------------------------------

/// Which investigation branch a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCategory {
    PaidMedia,
    Influencer,
    Offline,
}

impl std::fmt::Display for ChannelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelCategory::PaidMedia  => write!(f, "paid_media"),
            ChannelCategory::Influencer => write!(f, "influencer"),
            ChannelCategory::Offline    => write!(f, "offline"),
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// Tag derived from the root-cause text by the action classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    LocalizedCampaignIssue,
    AuctionPressure,
    AudienceSaturation,
    CreativeFatigue,
    TrackingBreak,
    LandingPageIssue,
    Seasonality,
    PlatformChange,
    Unknown,
}

impl std::fmt::Display for RootCauseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootCauseCategory::LocalizedCampaignIssue => write!(f, "localized_campaign_issue"),
            RootCauseCategory::AuctionPressure        => write!(f, "auction_pressure"),
            RootCauseCategory::AudienceSaturation     => write!(f, "audience_saturation"),
            RootCauseCategory::CreativeFatigue        => write!(f, "creative_fatigue"),
            RootCauseCategory::TrackingBreak          => write!(f, "tracking_break"),
            RootCauseCategory::LandingPageIssue       => write!(f, "landing_page_issue"),
            RootCauseCategory::Seasonality            => write!(f, "seasonality"),
            RootCauseCategory::PlatformChange         => write!(f, "platform_change"),
            RootCauseCategory::Unknown                => write!(f, "unknown"),
        }
    }
}

/// Where a diagnosis came from. Anything other than `Generated` is a
/// labelled fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSource {
    Generated,
    /// The model answered but the answer could not be parsed.
    ParseFallback,
    /// The text-generation port was unavailable.
    PortFallback,
}

/// Audience-specific summaries of the same diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaSummaries {
    pub executive: String,
    pub director: String,
    pub marketer: String,
    pub technical: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub root_cause: String,
    pub root_cause_category: RootCauseCategory,
    /// Clamped to `[0, 1]`.
    pub confidence: f64,
    pub supporting_evidence: Vec<String>,
    /// Free-text hints; may contain action keys such as `budget_decrease`.
    pub recommended_actions: Vec<String>,
    pub summaries: PersonaSummaries,
    pub source: DiagnosisSource,
}

// ---------------------------------------------------------------------------
// Critic validation
// ---------------------------------------------------------------------------

/// Outcome of the triple-lock check. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticValidation {
    pub is_valid: bool,
    /// Clamped to `[0, 1]`.
    pub hallucination_risk: f64,
    pub data_grounded: bool,
    pub evidence_verified: bool,
    pub issues: Vec<String>,
}

impl CriticValidation {
    /// `(is_valid && data_grounded && risk < 0.5) || risk ≤ 0.25`.
    ///
    /// The second disjunct lets very-low-risk diagnoses through even when the
    /// grounding flag came back conservatively false.
    pub fn passes(&self) -> bool {
        (self.is_valid && self.data_grounded && self.hallucination_risk < 0.5)
            || self.hallucination_risk <= 0.25
    }
}

// ---------------------------------------------------------------------------
// Action vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    BudgetChange,
    BidAdjustment,
    Pause,
    Enable,
    Notification,
    Exclusion,
    Contract,
    Negotiation,
    Communication,
}

impl ActionType {
    /// Types with a programmatic platform lever. Offline channels have none.
    pub fn is_programmatic_lever(&self) -> bool {
        matches!(
            self,
            ActionType::BudgetChange | ActionType::BidAdjustment | ActionType::Pause | ActionType::Enable
        )
    }

    /// Types whose effect can be reverted by an executor.
    pub fn is_reversible(&self) -> bool {
        !matches!(
            self,
            ActionType::Notification | ActionType::Contract | ActionType::Negotiation | ActionType::Communication
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::BudgetChange  => write!(f, "budget_change"),
            ActionType::BidAdjustment => write!(f, "bid_adjustment"),
            ActionType::Pause         => write!(f, "pause"),
            ActionType::Enable        => write!(f, "enable"),
            ActionType::Notification  => write!(f, "notification"),
            ActionType::Exclusion     => write!(f, "exclusion"),
            ActionType::Contract      => write!(f, "contract"),
            ActionType::Negotiation   => write!(f, "negotiation"),
            ActionType::Communication => write!(f, "communication"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low    => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High   => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_severity_bands_use_inclusive_boundaries() {
        assert_eq!(Severity::from_z(2.0), Severity::Low);
        assert_eq!(Severity::from_z(2.5), Severity::Medium);
        assert_eq!(Severity::from_z(3.0), Severity::High);
        assert_eq!(Severity::from_z(4.0), Severity::Critical);
        assert_eq!(Severity::from_z(-4.0), Severity::Critical);
    }

    #[test]
    fn test_severity_orders_low_to_critical() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(AnalysisWindow::new(d("2025-01-15"), d("2025-01-01")).is_none());
        let w = AnalysisWindow::ending(d("2025-01-15"), 15);
        assert_eq!(w.start, d("2025-01-01"));
        assert!(w.contains(d("2025-01-15")));
        assert!(!w.contains(d("2025-01-16")));
    }

    #[test]
    fn test_series_sorts_points() {
        let s = MetricSeries::new(
            "meta_ads",
            "cpa",
            vec![MetricPoint::new(d("2025-01-03"), 1.0), MetricPoint::new(d("2025-01-01"), 2.0)],
        );
        assert_eq!(s.points[0].date, d("2025-01-01"));
    }

    #[test]
    fn test_validation_pass_rule_boundaries() {
        let v = |is_valid, grounded, risk| CriticValidation {
            is_valid,
            hallucination_risk: risk,
            data_grounded: grounded,
            evidence_verified: true,
            issues: vec![],
        };
        assert!(v(false, false, 0.25).passes());
        assert!(!v(true, false, 0.26).passes());
        assert!(v(true, true, 0.4).passes());
        assert!(!v(true, true, 0.5).passes());
    }

    #[test]
    fn test_display_is_snake_case() {
        assert_eq!(ActionType::BudgetChange.to_string(), "budget_change");
        assert_eq!(RootCauseCategory::AuctionPressure.to_string(), "auction_pressure");
        assert_eq!(ChannelCategory::PaidMedia.to_string(), "paid_media");
    }
}
