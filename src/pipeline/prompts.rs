//! Prompt text for every model call the pipeline makes.
//!
//! Kept apart from the stages so wording changes never touch control flow,
//! and so tests can match on stable markers (`CHANNEL CLASSIFICATION`,
//! `ROOT CAUSE ANALYSIS`, `TRIPLE-LOCK VALIDATION`, `INVESTIGATION SUMMARY`).

use crate::model::{Anomaly, ChannelCategory, Diagnosis, HistoricalIncident};
use crate::retriever::render_context;

pub const ROUTER_SYSTEM: &str = "You are a marketing channel taxonomy classifier. \
Answer with exactly one word: PAID_MEDIA, INFLUENCER or OFFLINE.";

pub const INVESTIGATOR_SYSTEM: &str = "You are a senior performance-marketing analyst. \
Summarise the evidence for the anomaly in at most eight bullet points. \
Cite the figures you rely on. Do not introduce facts that are not in the evidence.";

pub const EXPLAINER_SYSTEM: &str = "You are a marketing diagnostics expert. \
Identify the most likely root cause of the anomaly from the evidence and historical incidents provided. \
Every claim must reference a figure from the evidence or a listed incident. \
Label inferences as such. Respond with a single JSON object and nothing else.";

pub const CRITIC_SYSTEM: &str = "You are a skeptical reviewer auditing an AI-generated diagnosis. \
Check it against the raw evidence only. Respond with a single JSON object and nothing else.";

pub fn router_prompt(channel: &str) -> String {
    format!(
        "CHANNEL CLASSIFICATION\n\
         Classify the marketing channel '{channel}'.\n\
         - PAID_MEDIA: search, social, display, video or programmatic advertising bought in auctions\n\
         - INFLUENCER: creator, ambassador or affiliate-creator partnerships\n\
         - OFFLINE: TV, radio, print, out-of-home, events, direct mail, podcasts\n\
         Answer with one word."
    )
}

fn anomaly_block(anomaly: &Anomaly) -> String {
    format!(
        "Channel: {}\nMetric: {}\nDirection: {}\nCurrent value: {:.2}\nExpected value: {:.2}\n\
         Deviation: {:+.1}%\nZ-score: {:.2}\nSeverity: {}\nDetected: {}\nAnalysis window: {}",
        anomaly.channel,
        anomaly.metric,
        anomaly.direction,
        anomaly.current_value,
        anomaly.expected_value,
        anomaly.deviation_pct,
        anomaly.z_score,
        anomaly.severity,
        anomaly.detected_at,
        anomaly.analysis_window
    )
}

pub fn investigator_prompt(anomaly: &Anomaly, category: ChannelCategory, evidence: &str) -> String {
    format!(
        "INVESTIGATION SUMMARY ({category})\n\n## Anomaly\n{}\n\n## Evidence\n{evidence}\n\n\
         Summarise what the evidence says about the likely drivers of this anomaly.",
        anomaly_block(anomaly)
    )
}

pub fn explainer_prompt(anomaly: &Anomaly, evidence: &str, incidents: &[HistoricalIncident]) -> String {
    let history = match render_context(incidents) {
        h if h.is_empty() => "## Historical Context\nNo comparable past incidents on or before the analysis date.\n".to_string(),
        h => h,
    };
    format!(
        "ROOT CAUSE ANALYSIS\n\n## Anomaly\n{}\n\n## Evidence\n{evidence}\n\n{history}\n\
         Return JSON with these fields:\n\
         {{\n\
           \"root_cause\": \"one-sentence root cause\",\n\
           \"confidence\": 0.0,\n\
           \"supporting_evidence\": [\"figure-backed statement\"],\n\
           \"actions\": [{{\"template_id\": \"bid_decrease\", \"reason\": \"why\", \"priority\": 1}}],\n\
           \"recommended_actions\": [\"free-text recommendation\"],\n\
           \"executive_summary\": \"two sentences for a VP\",\n\
           \"director_summary\": \"channel-level impact and plan\",\n\
           \"marketer_summary\": \"hands-on next steps\",\n\
           \"technical_details\": \"data and method notes\"\n\
         }}\n\
         Valid template_id values: budget_increase, budget_decrease, budget_reallocation, bid_increase, \
         bid_decrease, brand_defense, pause_campaign, enable_campaign, creative_refresh, audience_refresh, \
         tracking_alert, landing_page_alert, platform_alert, seasonal_review, bot_traffic, influencer_fraud, \
         make_good, vendor_delivery, measurement_audit, partner_issue, manual_review.",
        anomaly_block(anomaly)
    )
}

pub fn critic_prompt(
    anomaly: Option<&Anomaly>,
    evidence: &str,
    incidents: &[HistoricalIncident],
    diagnosis: &Diagnosis,
) -> String {
    let anomaly_text = anomaly.map(anomaly_block).unwrap_or_else(|| "(no anomaly selected)".to_string());
    format!(
        "TRIPLE-LOCK VALIDATION\n\n## Anomaly\n{anomaly_text}\n\n## Raw Evidence\n{evidence}\n\n{}\n\
         ## Diagnosis Under Review\nRoot cause: {}\nConfidence: {:.2}\nSupporting evidence:\n{}\n\n\
         Perform three checks:\n\
         1. DATA GROUNDING: every claim cites a figure from the raw evidence or a listed historical incident.\n\
         2. EVIDENCE VERIFICATION: conclusions follow from the cited evidence. A labelled inference is acceptable; \
         a fabricated fact is not.\n\
         3. HALLUCINATION SCORE: a number in [0, 1] estimating the risk that the diagnosis contains fabricated content.\n\n\
         Return JSON:\n\
         {{\"is_valid\": true, \"hallucination_risk\": 0.0, \"data_grounded\": true, \
         \"evidence_verified\": true, \"issues\": [\"specific problem\"]}}",
        render_context(incidents),
        diagnosis.root_cause,
        diagnosis.confidence,
        diagnosis
            .supporting_evidence
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
