//! # Stage: Explain
//!
//! ## Responsibility
//! Turn evidence plus historical incidents into a structured [`Diagnosis`]
//! using the deep tier.
//!
//! ## Guarantees
//! - Always returns a diagnosis; fallbacks are labelled by [`DiagnosisSource`]
//! - `confidence` is clamped to `[0, 1]`
//! - `root_cause_category` is derived from the root-cause text by the action
//!   classifier, never taken from the model
//!
//! ## NOT Responsible For
//! - Judging the diagnosis (validate)
//! - Turning hints into actions (propose)

use std::sync::Arc;

use tracing::{info, warn};

use super::parse::{parse_json, DiagnosisResponse};
use super::prompts;
use crate::actions::classifier;
use crate::model::{Anomaly, Diagnosis, DiagnosisSource, HistoricalIncident, PersonaSummaries};
use crate::ports::text::TextGenerator;

pub const PARSE_FAILURE_ROOT_CAUSE: &str = "Unable to parse diagnosis";

pub struct Explainer {
    generator: Arc<dyn TextGenerator>,
}

impl Explainer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn explain(&self, anomaly: &Anomaly, evidence: &str, incidents: &[HistoricalIncident]) -> Diagnosis {
        let prompt = prompts::explainer_prompt(anomaly, evidence, incidents);
        match self.generator.complete(prompts::EXPLAINER_SYSTEM, &prompt).await {
            Ok(text) => {
                let diagnosis = parse_diagnosis(&text);
                info!(
                    anomaly_id = %anomaly.id,
                    category = %diagnosis.root_cause_category,
                    confidence = diagnosis.confidence,
                    parsed = diagnosis.source == DiagnosisSource::Generated,
                    "diagnosis produced"
                );
                diagnosis
            }
            Err(e) => {
                warn!(error = %e, anomaly_id = %anomaly.id, "explainer unavailable; using fallback diagnosis");
                port_fallback(anomaly)
            }
        }
    }
}

/// Parse a model response; malformed output becomes the parse fallback.
pub fn parse_diagnosis(text: &str) -> Diagnosis {
    let resp: DiagnosisResponse = match parse_json(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "diagnosis response not parseable");
            return parse_fallback(text);
        }
    };
    if resp.root_cause.trim().is_empty() {
        return parse_fallback(text);
    }

    let mut recommended: Vec<String> = resp
        .actions
        .iter()
        .filter(|a| !a.template_id.trim().is_empty())
        .map(|a| {
            if a.reason.trim().is_empty() {
                a.template_id.trim().to_string()
            } else {
                format!("{}: {}", a.template_id.trim(), a.reason.trim())
            }
        })
        .collect();
    recommended.extend(resp.recommended_actions.into_iter().filter(|s| !s.trim().is_empty()));

    Diagnosis {
        root_cause_category: classifier::categorize(&resp.root_cause),
        root_cause: resp.root_cause,
        confidence: resp.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        supporting_evidence: resp.supporting_evidence,
        recommended_actions: recommended,
        summaries: PersonaSummaries {
            executive: resp.executive_summary,
            director: resp.director_summary,
            marketer: resp.marketer_summary,
            technical: resp.technical_details,
        },
        source: DiagnosisSource::Generated,
    }
}

fn parse_fallback(raw: &str) -> Diagnosis {
    let excerpt: String = raw.chars().take(500).collect();
    Diagnosis {
        root_cause: PARSE_FAILURE_ROOT_CAUSE.to_string(),
        root_cause_category: classifier::categorize(PARSE_FAILURE_ROOT_CAUSE),
        confidence: 0.0,
        supporting_evidence: Vec::new(),
        recommended_actions: Vec::new(),
        summaries: PersonaSummaries { technical: excerpt, ..PersonaSummaries::default() },
        source: DiagnosisSource::ParseFallback,
    }
}

/// Diagnosis used when the deep tier cannot be reached.
pub fn port_fallback(anomaly: &Anomaly) -> Diagnosis {
    let root_cause = format!("Anomaly detected in {}: {} {}", anomaly.channel, anomaly.metric, anomaly.direction);
    Diagnosis {
        root_cause_category: classifier::categorize(&root_cause),
        supporting_evidence: vec![
            format!(
                "{} moved {:+.1}% against its baseline (z = {:.2})",
                anomaly.metric, anomaly.deviation_pct, anomaly.z_score
            ),
            "Automated analysis unavailable; manual review required".to_string(),
        ],
        recommended_actions: vec![
            "Review channel performance manually".to_string(),
            "Check for recent platform changes".to_string(),
            "Verify tracking implementation".to_string(),
        ],
        summaries: PersonaSummaries {
            executive: format!("{} needs manual review.", anomaly.headline()),
            ..PersonaSummaries::default()
        },
        root_cause,
        confidence: 0.3,
        source: DiagnosisSource::PortFallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisWindow, Direction, RootCauseCategory, Severity};
    use crate::ports::text::ScriptedGenerator;
    use chrono::NaiveDate;

    fn anomaly() -> Anomaly {
        let d = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
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
            detected_at: d,
            analysis_window: AnalysisWindow::ending(d, 15),
        }
    }

    const RESPONSE: &str = r#"Sure. {"root_cause": "Competitor bidding pushed CPCs up on brand terms",
        "confidence": 1.4,
        "supporting_evidence": ["CPC +32% since Jan 10"],
        "actions": [{"template_id": "bid_decrease", "reason": "lower bids on non-brand", "priority": 1}],
        "recommended_actions": ["Watch impression share"],
        "executive_summary": "Costs rose because a rival bid up.",
        "director_summary": "d", "marketer_summary": "m", "technical_details": "t"}"#;

    #[test]
    fn test_parse_maps_fields_and_clamps_confidence() {
        let d = parse_diagnosis(RESPONSE);
        assert_eq!(d.source, DiagnosisSource::Generated);
        assert_eq!(d.root_cause_category, RootCauseCategory::AuctionPressure);
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.recommended_actions[0], "bid_decrease: lower bids on non-brand");
        assert_eq!(d.recommended_actions[1], "Watch impression share");
        assert_eq!(d.summaries.executive, "Costs rose because a rival bid up.");
    }

    #[test]
    fn test_malformed_response_becomes_parse_fallback() {
        let d = parse_diagnosis("I think it was the weather.");
        assert_eq!(d.root_cause, PARSE_FAILURE_ROOT_CAUSE);
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.source, DiagnosisSource::ParseFallback);
        assert!(d.recommended_actions.is_empty());
    }

    #[test]
    fn test_empty_root_cause_is_a_parse_failure() {
        assert_eq!(parse_diagnosis(r#"{"confidence": 0.9}"#).source, DiagnosisSource::ParseFallback);
    }

    #[tokio::test]
    async fn test_port_failure_yields_labelled_fallback() {
        let d = Explainer::new(Arc::new(ScriptedGenerator::failing())).explain(&anomaly(), "e", &[]).await;
        assert_eq!(d.root_cause, "Anomaly detected in meta_ads: cpa spike");
        assert_eq!(d.confidence, 0.3);
        assert_eq!(d.source, DiagnosisSource::PortFallback);
        assert_eq!(d.recommended_actions.len(), 3);
    }

    #[tokio::test]
    async fn test_explain_uses_generated_response() {
        let gen = Arc::new(ScriptedGenerator::new().with_rule("ROOT CAUSE ANALYSIS", RESPONSE));
        let d = Explainer::new(gen.clone()).explain(&anomaly(), "e", &[]).await;
        assert_eq!(d.source, DiagnosisSource::Generated);
        assert!(gen.prompts()[0].contains("meta_ads"));
    }
}
