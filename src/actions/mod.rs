//! Remediation actions: the key catalog, the keyword classifier, the
//! saturation guardrail and the proposal engine.
//!
//! Every proposable action is an [`ActionKey`]; its platform semantics come
//! from one static table ([`ActionKey::template`]). Free-text matching lives
//! only in [`classifier`].

pub mod classifier;
pub mod engine;
pub mod guardrail;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ActionType, RiskLevel};

pub use engine::{ActionEngine, BLOCKED_ACTIONS, GUARDRAIL_REASONS};
pub use guardrail::SaturationGuardrail;

// ---------------------------------------------------------------------------
// ActionKey
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKey {
    BudgetIncrease,
    BudgetDecrease,
    BudgetReallocation,
    BidIncrease,
    BidDecrease,
    BrandDefense,
    PauseCampaign,
    EnableCampaign,
    CreativeRefresh,
    AudienceRefresh,
    TrackingAlert,
    LandingPageAlert,
    PlatformAlert,
    SeasonalReview,
    BotTraffic,
    InfluencerFraud,
    MakeGood,
    VendorDelivery,
    MeasurementAudit,
    PartnerIssue,
    ManualReview,
}

/// Spend lever an action pulls, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lever {
    Budget,
    Bid,
}

/// Which way an action moves its lever. `adjustment_pct` is always a
/// magnitude, so the direction is carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeverDirection {
    Up,
    Down,
    /// Moves spend between campaigns without changing the channel total.
    Shift,
}

impl ActionKey {
    pub const ALL: [ActionKey; 21] = [
        ActionKey::BudgetIncrease,
        ActionKey::BudgetDecrease,
        ActionKey::BudgetReallocation,
        ActionKey::BidIncrease,
        ActionKey::BidDecrease,
        ActionKey::BrandDefense,
        ActionKey::PauseCampaign,
        ActionKey::EnableCampaign,
        ActionKey::CreativeRefresh,
        ActionKey::AudienceRefresh,
        ActionKey::TrackingAlert,
        ActionKey::LandingPageAlert,
        ActionKey::PlatformAlert,
        ActionKey::SeasonalReview,
        ActionKey::BotTraffic,
        ActionKey::InfluencerFraud,
        ActionKey::MakeGood,
        ActionKey::VendorDelivery,
        ActionKey::MeasurementAudit,
        ActionKey::PartnerIssue,
        ActionKey::ManualReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKey::BudgetIncrease     => "budget_increase",
            ActionKey::BudgetDecrease     => "budget_decrease",
            ActionKey::BudgetReallocation => "budget_reallocation",
            ActionKey::BidIncrease        => "bid_increase",
            ActionKey::BidDecrease        => "bid_decrease",
            ActionKey::BrandDefense       => "brand_defense",
            ActionKey::PauseCampaign      => "pause_campaign",
            ActionKey::EnableCampaign     => "enable_campaign",
            ActionKey::CreativeRefresh    => "creative_refresh",
            ActionKey::AudienceRefresh    => "audience_refresh",
            ActionKey::TrackingAlert      => "tracking_alert",
            ActionKey::LandingPageAlert   => "landing_page_alert",
            ActionKey::PlatformAlert      => "platform_alert",
            ActionKey::SeasonalReview     => "seasonal_review",
            ActionKey::BotTraffic         => "bot_traffic",
            ActionKey::InfluencerFraud    => "influencer_fraud",
            ActionKey::MakeGood           => "make_good",
            ActionKey::VendorDelivery     => "vendor_delivery",
            ActionKey::MeasurementAudit   => "measurement_audit",
            ActionKey::PartnerIssue       => "partner_issue",
            ActionKey::ManualReview       => "manual_review",
        }
    }

    /// Parse a key name, accepting the template ids the explainer prompt
    /// historically used (`creative_fatigue`, `tracking_issue`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        if let Some(k) = Self::ALL.iter().find(|k| k.as_str() == s) {
            return Some(*k);
        }
        match s.as_str() {
            "creative_fatigue" => Some(ActionKey::CreativeRefresh),
            "tracking_issue" => Some(ActionKey::TrackingAlert),
            "platform_issue" => Some(ActionKey::PlatformAlert),
            "budget_exhaustion" => Some(ActionKey::BudgetIncrease),
            "competitor_bidding" => Some(ActionKey::BidIncrease),
            "audience_saturation" => Some(ActionKey::AudienceRefresh),
            _ => None,
        }
    }

    pub fn lever(&self) -> Option<Lever> {
        match self {
            ActionKey::BudgetIncrease | ActionKey::BudgetDecrease | ActionKey::BudgetReallocation => Some(Lever::Budget),
            ActionKey::BidIncrease | ActionKey::BidDecrease | ActionKey::BrandDefense => Some(Lever::Bid),
            _ => None,
        }
    }

    pub fn lever_direction(&self) -> Option<LeverDirection> {
        match self {
            ActionKey::BudgetIncrease | ActionKey::BidIncrease | ActionKey::BrandDefense => Some(LeverDirection::Up),
            ActionKey::BudgetDecrease | ActionKey::BidDecrease => Some(LeverDirection::Down),
            ActionKey::BudgetReallocation => Some(LeverDirection::Shift),
            _ => None,
        }
    }

    /// Pushes budget or bids up: the actions the saturation guardrail inspects.
    pub fn is_increase(&self) -> bool {
        self.lever_direction() == Some(LeverDirection::Up)
    }

    /// Decrease-class action on the same lever, for increases.
    pub fn decrease_counterpart(&self) -> Option<ActionKey> {
        match self {
            ActionKey::BudgetIncrease => Some(ActionKey::BudgetDecrease),
            ActionKey::BidIncrease => Some(ActionKey::BidDecrease),
            _ => None,
        }
    }

    /// Static catalog entry.
    pub fn template(self) -> ActionTemplate {
        use ActionType as T;
        use ParamValue::{Number, Text};
        use RiskLevel as R;
        match self {
            ActionKey::BudgetIncrease => ActionTemplate {
                action_type: T::BudgetChange,
                operation: "increase_budget",
                default_params: &[("adjustment_pct", Number(25.0))],
                risk_level: R::Medium,
                estimated_impact: "Captures additional volume while marginal returns hold",
            },
            ActionKey::BudgetDecrease => ActionTemplate {
                action_type: T::BudgetChange,
                operation: "decrease_budget",
                default_params: &[("adjustment_pct", Number(20.0))],
                risk_level: R::Medium,
                estimated_impact: "Limits spend exposure until efficiency recovers",
            },
            ActionKey::BudgetReallocation => ActionTemplate {
                action_type: T::BudgetChange,
                operation: "reallocate_budget",
                default_params: &[("adjustment_pct", Number(15.0)), ("target", Text("best_performing_campaigns"))],
                risk_level: R::Medium,
                estimated_impact: "Moves spend toward campaigns with stronger marginal return",
            },
            ActionKey::BidIncrease => ActionTemplate {
                action_type: T::BidAdjustment,
                operation: "increase_bid",
                default_params: &[("adjustment_pct", Number(20.0))],
                risk_level: R::Medium,
                estimated_impact: "Recovers impression share lost to auction pressure",
            },
            ActionKey::BidDecrease => ActionTemplate {
                action_type: T::BidAdjustment,
                operation: "decrease_bid",
                default_params: &[("adjustment_pct", Number(15.0))],
                risk_level: R::Medium,
                estimated_impact: "Brings cost per acquisition back toward baseline",
            },
            ActionKey::BrandDefense => ActionTemplate {
                action_type: T::BidAdjustment,
                operation: "brand_defense",
                default_params: &[("adjustment_pct", Number(10.0)), ("scope", Text("brand_terms"))],
                risk_level: R::Medium,
                estimated_impact: "Protects branded terms from competitor conquesting",
            },
            ActionKey::PauseCampaign => ActionTemplate {
                action_type: T::Pause,
                operation: "pause_campaign",
                default_params: &[("duration_hours", Number(24.0))],
                risk_level: R::High,
                estimated_impact: "Stops spend on the affected campaign immediately",
            },
            ActionKey::EnableCampaign => ActionTemplate {
                action_type: T::Enable,
                operation: "enable_campaign",
                default_params: &[],
                risk_level: R::Medium,
                estimated_impact: "Restores delivery on a paused campaign",
            },
            ActionKey::CreativeRefresh => ActionTemplate {
                action_type: T::Notification,
                operation: "request_creative_refresh",
                default_params: &[("team", Text("creative")), ("urgency", Text("normal"))],
                risk_level: R::Low,
                estimated_impact: "New creative typically restores engagement within a week",
            },
            ActionKey::AudienceRefresh => ActionTemplate {
                action_type: T::Notification,
                operation: "request_audience_refresh",
                default_params: &[("team", Text("media")), ("urgency", Text("normal"))],
                risk_level: R::Low,
                estimated_impact: "Broader or refreshed audiences reduce frequency pressure",
            },
            ActionKey::TrackingAlert => ActionTemplate {
                action_type: T::Notification,
                operation: "alert_tracking_break",
                default_params: &[("team", Text("engineering")), ("urgency", Text("critical"))],
                risk_level: R::Low,
                estimated_impact: "Restores conversion measurement; reported performance recovers once fixed",
            },
            ActionKey::LandingPageAlert => ActionTemplate {
                action_type: T::Notification,
                operation: "alert_landing_page",
                default_params: &[("team", Text("web")), ("urgency", Text("high"))],
                risk_level: R::Low,
                estimated_impact: "Fixing the site path recovers conversion rate",
            },
            ActionKey::PlatformAlert => ActionTemplate {
                action_type: T::Notification,
                operation: "alert_platform_change",
                default_params: &[("team", Text("platform_ops")), ("urgency", Text("normal"))],
                risk_level: R::Low,
                estimated_impact: "Platform owners can confirm and adapt to the change",
            },
            ActionKey::SeasonalReview => ActionTemplate {
                action_type: T::Notification,
                operation: "review_seasonal_plan",
                default_params: &[("team", Text("planning")), ("urgency", Text("normal"))],
                risk_level: R::Low,
                estimated_impact: "Aligns pacing with the seasonal demand curve",
            },
            ActionKey::BotTraffic => ActionTemplate {
                action_type: T::Exclusion,
                operation: "block_ip_range",
                default_params: &[("source", Text("invalid_traffic_report"))],
                risk_level: R::Medium,
                estimated_impact: "Removes invalid traffic from spend and reporting",
            },
            ActionKey::InfluencerFraud => ActionTemplate {
                action_type: T::Contract,
                operation: "terminate_agreement",
                default_params: &[("reason", Text("fraud_suspected"))],
                risk_level: R::High,
                estimated_impact: "Stops payment for fraudulent creator inventory",
            },
            ActionKey::MakeGood => ActionTemplate {
                action_type: T::Negotiation,
                operation: "request_make_good",
                default_params: &[("compensation", Text("equivalent_spot"))],
                risk_level: R::Low,
                estimated_impact: "Recovers the value of preempted or under-delivered inventory",
            },
            ActionKey::VendorDelivery => ActionTemplate {
                action_type: T::Communication,
                operation: "confirm_vendor_delivery",
                default_params: &[("team", Text("media_buying"))],
                risk_level: R::Low,
                estimated_impact: "Confirms whether the placement actually ran as booked",
            },
            ActionKey::MeasurementAudit => ActionTemplate {
                action_type: T::Communication,
                operation: "request_measurement_audit",
                default_params: &[("team", Text("analytics"))],
                risk_level: R::Low,
                estimated_impact: "Separates a measurement gap from a real performance change",
            },
            ActionKey::PartnerIssue => ActionTemplate {
                action_type: T::Communication,
                operation: "contact_partner",
                default_params: &[],
                risk_level: R::Low,
                estimated_impact: "Clarifies partner-side changes driving the shift",
            },
            ActionKey::ManualReview => ActionTemplate {
                action_type: T::Notification,
                operation: "manual_review",
                default_params: &[("team", Text("decision_science")), ("urgency", Text("normal"))],
                risk_level: R::Low,
                estimated_impact: "An analyst confirms the diagnosis before any spend change",
            },
        }
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActionTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Text(&'static str),
}

impl ParamValue {
    pub fn to_json(self) -> serde_json::Value {
        match self {
            ParamValue::Number(n) => serde_json::json!(n),
            ParamValue::Text(t) => serde_json::Value::String(t.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionTemplate {
    pub action_type: ActionType,
    pub operation: &'static str,
    pub default_params: &'static [(&'static str, ParamValue)],
    pub risk_level: RiskLevel,
    pub estimated_impact: &'static str,
}

// ---------------------------------------------------------------------------
// ActionProposal
// ---------------------------------------------------------------------------

/// A remediation handed to an external executor. Approval is required
/// for anything above low risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action_id: String,
    pub action_key: ActionKey,
    pub action_type: ActionType,
    pub platform: String,
    pub resource_id: String,
    pub operation: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub estimated_impact: String,
    /// Why this action was proposed, including any guardrail substitution.
    pub rationale: String,
}

impl ActionProposal {
    /// Dedup identity.
    pub fn dedup_key(&self) -> (ActionType, &str) {
        (self.action_type, self.operation.as_str())
    }
}

/// Platform that owns a channel's inventory.
pub fn platform_for(channel: &str) -> String {
    let c = channel.to_lowercase();
    if c.starts_with("google") {
        "google_ads".to_string()
    } else if c.starts_with("meta") {
        "meta_ads".to_string()
    } else if c.starts_with("tiktok") {
        "tiktok_ads".to_string()
    } else if c.starts_with("influencer") {
        "creatoriq".to_string()
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_round_trips_through_its_name() {
        for key in ActionKey::ALL {
            assert_eq!(ActionKey::parse(key.as_str()), Some(key), "key {key}");
        }
    }

    #[test]
    fn test_legacy_template_ids_are_accepted() {
        assert_eq!(ActionKey::parse("tracking_issue"), Some(ActionKey::TrackingAlert));
        assert_eq!(ActionKey::parse(" Creative_Fatigue "), Some(ActionKey::CreativeRefresh));
        assert_eq!(ActionKey::parse("launch_rocket"), None);
    }

    #[test]
    fn test_operations_are_unique_per_type() {
        let mut seen = std::collections::HashSet::new();
        for key in ActionKey::ALL {
            let t = key.template();
            assert!(seen.insert((t.action_type, t.operation)), "duplicate ({}, {})", t.action_type, t.operation);
        }
    }

    #[test]
    fn test_spend_levers_carry_adjustment_and_notifications_carry_team() {
        for key in ActionKey::ALL {
            let t = key.template();
            let has = |name: &str| t.default_params.iter().any(|(k, _)| *k == name);
            match t.action_type {
                ActionType::BudgetChange | ActionType::BidAdjustment => assert!(has("adjustment_pct"), "{key}"),
                ActionType::Notification => assert!(has("team"), "{key}"),
                _ => {}
            }
        }
    }

    #[test]
    fn test_increase_counterparts() {
        assert!(ActionKey::BudgetIncrease.is_increase());
        assert_eq!(ActionKey::BidIncrease.decrease_counterpart(), Some(ActionKey::BidDecrease));
        assert!(ActionKey::BrandDefense.decrease_counterpart().is_none());
        assert_eq!(ActionKey::BrandDefense.lever(), Some(Lever::Bid));
    }

    #[test]
    fn test_every_lever_action_has_a_direction() {
        for key in ActionKey::ALL {
            assert_eq!(key.lever().is_some(), key.lever_direction().is_some(), "{key}");
        }
        assert!(ActionKey::BrandDefense.is_increase());
        assert!(!ActionKey::BudgetReallocation.is_increase());
        assert!(!ActionKey::BidDecrease.is_increase());
    }

    #[test]
    fn test_platform_mapping() {
        assert_eq!(platform_for("google_pmax"), "google_ads");
        assert_eq!(platform_for("meta_ads"), "meta_ads");
        assert_eq!(platform_for("influencer_campaigns"), "creatoriq");
        assert_eq!(platform_for("tv"), "tv");
    }
}
