//! Keyword classifier over diagnosis text.
//!
//! All free-text matching for the action engine lives here: root-cause
//! categorisation, hint triggers, and the offline vendor/measurement
//! triggers. The engine only sees [`RootCauseCategory`] and [`ActionKey`]s.

use crate::model::{ChannelCategory, RootCauseCategory};

use super::ActionKey;

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect()
}

fn any_phrase(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// True when some word starts with one of `stems` (so "bid" matches
/// "bids" and "bidding" but not "forbidden").
fn any_stem(words: &[&str], stems: &[&str]) -> bool {
    words.iter().any(|w| stems.iter().any(|s| w.starts_with(s)))
}

// ---------------------------------------------------------------------------
// Root-cause categories
// ---------------------------------------------------------------------------

const LOCALIZED: &[&str] = &[
    "localized to",
    "isolated to",
    "concentrated in",
    "single campaign",
    "specific campaign",
    "one campaign",
    "high-value campaign",
];

/// Rules in priority order; the first match wins.
const CATEGORY_RULES: &[(RootCauseCategory, &[&str])] = &[
    (RootCauseCategory::AuctionPressure, &["auction", "competitor", "bidding"]),
    (RootCauseCategory::AudienceSaturation, &["frequency", "saturation", "saturated", "fatigue"]),
    (RootCauseCategory::CreativeFatigue, &["creative"]),
    (RootCauseCategory::TrackingBreak, &["tracking", "pixel", "attribution"]),
    (RootCauseCategory::LandingPageIssue, &["landing", "checkout", "site"]),
    (RootCauseCategory::Seasonality, &["season"]),
    (RootCauseCategory::PlatformChange, &["policy", "platform", "algorithm"]),
];

/// Derive the category of a root-cause sentence.
pub fn categorize(root_cause: &str) -> RootCauseCategory {
    let text = root_cause.to_lowercase();
    if any_phrase(&text, LOCALIZED) {
        return RootCauseCategory::LocalizedCampaignIssue;
    }
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| any_phrase(&text, keywords))
        .map(|(category, _)| *category)
        .unwrap_or(RootCauseCategory::Unknown)
}

/// Ordered allow-list of actions for a category.
pub fn allowed_actions(category: RootCauseCategory) -> &'static [ActionKey] {
    use ActionKey::*;
    match category {
        RootCauseCategory::LocalizedCampaignIssue => &[PauseCampaign, BudgetReallocation],
        RootCauseCategory::AuctionPressure => &[BidIncrease, BudgetReallocation, BrandDefense],
        RootCauseCategory::AudienceSaturation => &[AudienceRefresh, CreativeRefresh, BudgetDecrease],
        RootCauseCategory::CreativeFatigue => &[CreativeRefresh],
        RootCauseCategory::TrackingBreak => &[TrackingAlert],
        RootCauseCategory::LandingPageIssue => &[LandingPageAlert],
        RootCauseCategory::Seasonality => &[SeasonalReview],
        RootCauseCategory::PlatformChange => &[PlatformAlert],
        RootCauseCategory::Unknown => &[],
    }
}

// ---------------------------------------------------------------------------
// Hint triggers
// ---------------------------------------------------------------------------

const DECREASE: &[&str] = &["decreas", "reduc", "lower", "cut", "trim"];
const INCREASE: &[&str] = &["increas", "raise", "boost", "scale", "grow"];

/// Actions named or implied by one free-text recommendation.
///
/// Explicit key names (`budget_decrease`, legacy template ids) are matched
/// first, then keyword pairs such as "reduce" + "budget".
pub fn hint_triggers(hint: &str, channel: ChannelCategory) -> Vec<ActionKey> {
    let text = hint.to_lowercase();
    let w = words(&text);
    let mut keys = Vec::new();

    for token in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if token.contains('_') {
            if let Some(k) = ActionKey::parse(token) {
                keys.push(k);
            }
        }
    }

    let budget = any_stem(&w, &["budget", "spend"]);
    let bid = any_stem(&w, &["bid"]);
    let down = any_stem(&w, DECREASE);
    let up = any_stem(&w, INCREASE);
    if budget {
        if down {
            keys.push(ActionKey::BudgetDecrease);
        } else if up {
            keys.push(ActionKey::BudgetIncrease);
        }
        if any_stem(&w, &["realloc", "shift", "move"]) {
            keys.push(ActionKey::BudgetReallocation);
        }
    }
    if bid {
        if down {
            keys.push(ActionKey::BidDecrease);
        } else if up {
            keys.push(ActionKey::BidIncrease);
        }
    }
    if any_stem(&w, &["pause"]) {
        keys.push(ActionKey::PauseCampaign);
    }
    if any_stem(&w, &["resume", "reenable"]) || text.contains("re-enable") {
        keys.push(ActionKey::EnableCampaign);
    }
    if any_stem(&w, &["creative"]) {
        keys.push(ActionKey::CreativeRefresh);
    }
    if any_stem(&w, &["audience"]) && any_stem(&w, &["refresh", "expand", "broaden", "exclu"]) {
        keys.push(ActionKey::AudienceRefresh);
    }
    if any_stem(&w, &["tracking", "pixel"]) {
        keys.push(ActionKey::TrackingAlert);
    }
    if text.contains("landing page") || any_stem(&w, &["checkout"]) {
        keys.push(ActionKey::LandingPageAlert);
    }
    if any_stem(&w, &["fraud"]) || text.contains("fake follower") {
        keys.push(match channel {
            ChannelCategory::Influencer => ActionKey::InfluencerFraud,
            _ => ActionKey::BotTraffic,
        });
    }
    if w.iter().any(|x| *x == "bot" || *x == "bots") || text.contains("invalid traffic") {
        keys.push(ActionKey::BotTraffic);
    }
    if any_stem(&w, &["partner", "affiliate", "coupon"]) {
        keys.push(ActionKey::PartnerIssue);
    }
    if any_stem(&w, &["manual"]) {
        keys.push(ActionKey::ManualReview);
    }
    keys
}

// ---------------------------------------------------------------------------
// Offline triggers
// ---------------------------------------------------------------------------

const MAKE_GOOD: &[&str] = &["preempt", "make-good", "make good", "makegood", "under-deliver", "underdeliver", "grp"];
const VENDOR: &[&str] = &["vendor", "delivery", "delivered", "flight", "inventory", "drop date", "postal", "station"];
const MEASUREMENT: &[&str] = &["measurement", "nielsen", "attribution", "promo code", "vanity url", "lift study", "response rate"];

/// Negotiation and communication actions for an offline channel, drawn from
/// the root cause and hints together.
pub fn offline_triggers(text: &str) -> Vec<ActionKey> {
    let text = text.to_lowercase();
    let mut keys = Vec::new();
    if any_phrase(&text, MAKE_GOOD) {
        keys.push(ActionKey::MakeGood);
    }
    if any_phrase(&text, VENDOR) {
        keys.push(ActionKey::VendorDelivery);
    }
    if any_phrase(&text, MEASUREMENT) {
        keys.push(ActionKey::MeasurementAudit);
    }
    keys
}

/// Metrics where a higher value means worse efficiency.
pub fn is_cost_metric(metric: &str) -> bool {
    let m = metric.to_lowercase();
    matches!(m.as_str(), "cpa" | "cpc" | "cpm" | "cpl" | "cac" | "cpi" | "cost") || m.starts_with("cost_per")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // -- Categories ---------------------------------------------------------

    #[rstest]
    #[case("Drop isolated to a single high-value campaign in Texas", RootCauseCategory::LocalizedCampaignIssue)]
    #[case("Competitor bidding aggressively on brand terms", RootCauseCategory::AuctionPressure)]
    #[case("Auction overlap rose after a new entrant", RootCauseCategory::AuctionPressure)]
    #[case("Frequency above 8 indicates audience saturation", RootCauseCategory::AudienceSaturation)]
    #[case("Creative fatigue on the hero video", RootCauseCategory::AudienceSaturation)]
    #[case("Creative refresh overdue; CTR decayed", RootCauseCategory::CreativeFatigue)]
    #[case("Pixel stopped firing after deploy", RootCauseCategory::TrackingBreak)]
    #[case("Checkout errors on mobile", RootCauseCategory::LandingPageIssue)]
    #[case("Seasonal demand dip after holidays", RootCauseCategory::Seasonality)]
    #[case("Algorithm update changed delivery", RootCauseCategory::PlatformChange)]
    #[case("Nothing obvious", RootCauseCategory::Unknown)]
    fn test_categorize_priority_order(#[case] text: &str, #[case] expected: RootCauseCategory) {
        assert_eq!(categorize(text), expected, "text: {text}");
    }

    #[test]
    fn test_auction_pressure_allow_list_order() {
        assert_eq!(
            allowed_actions(RootCauseCategory::AuctionPressure),
            &[ActionKey::BidIncrease, ActionKey::BudgetReallocation, ActionKey::BrandDefense]
        );
        assert!(allowed_actions(RootCauseCategory::Unknown).is_empty());
    }

    // -- Hints --------------------------------------------------------------

    #[rstest]
    #[case("Decrease budget by 20% until CPA recovers", ActionKey::BudgetDecrease)]
    #[case("Raise daily spend on the winning ad set", ActionKey::BudgetIncrease)]
    #[case("Lower bids on broad match keywords", ActionKey::BidDecrease)]
    #[case("budget_increase: headroom on the response curve", ActionKey::BudgetIncrease)]
    #[case("tracking_issue - verify the tag", ActionKey::TrackingAlert)]
    #[case("Pause the underperforming campaign", ActionKey::PauseCampaign)]
    #[case("Review channel performance manually", ActionKey::ManualReview)]
    #[case("Contact the affiliate partner about coupon leakage", ActionKey::PartnerIssue)]
    fn test_hint_triggers(#[case] hint: &str, #[case] expected: ActionKey) {
        let keys = hint_triggers(hint, ChannelCategory::PaidMedia);
        assert!(keys.contains(&expected), "{hint:?} -> {keys:?}");
    }

    #[test]
    fn test_decrease_wins_over_increase_in_one_hint() {
        let keys = hint_triggers("Reduce budget instead of increasing bids", ChannelCategory::PaidMedia);
        assert!(keys.contains(&ActionKey::BudgetDecrease));
        assert!(keys.contains(&ActionKey::BidDecrease));
        assert!(!keys.contains(&ActionKey::BudgetIncrease));
    }

    #[test]
    fn test_fraud_maps_by_channel_category() {
        assert_eq!(hint_triggers("suspected fraud", ChannelCategory::Influencer), vec![ActionKey::InfluencerFraud]);
        assert_eq!(hint_triggers("suspected fraud", ChannelCategory::PaidMedia), vec![ActionKey::BotTraffic]);
    }

    #[test]
    fn test_bot_is_word_matched() {
        assert!(hint_triggers("both campaigns look fine", ChannelCategory::PaidMedia).is_empty());
    }

    // -- Offline ------------------------------------------------------------

    #[test]
    fn test_offline_triggers() {
        assert_eq!(offline_triggers("Spot was preempted by breaking news"), vec![ActionKey::MakeGood]);
        assert_eq!(
            offline_triggers("Vendor missed the drop date; Nielsen ratings unchanged"),
            vec![ActionKey::VendorDelivery, ActionKey::MeasurementAudit]
        );
        assert!(offline_triggers("creative wear-out").is_empty());
    }

    #[rstest]
    #[case("cpa", true)]
    #[case("CPC", true)]
    #[case("cost_per_lead", true)]
    #[case("roas", false)]
    #[case("spend", false)]
    fn test_cost_metrics(#[case] metric: &str, #[case] expected: bool) {
        assert_eq!(is_cost_metric(metric), expected);
    }
}
