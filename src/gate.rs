//! # Stage: Validation Gate (Triple-Lock)
//!
//! ## Responsibility
//! Audit a generated diagnosis against the raw evidence it claims to rest on
//! and turn the critic's answer into a binary pass/fail.
//!
//! Locks (one deep-tier call checks all three):
//! 1. Data grounding: every claim cites a figure or a retrieved incident
//! 2. Evidence verification: conclusions follow from what is cited
//! 3. Hallucination score: fabrication risk in `[0, 1]`
//!
//! ## Guarantees
//! - Decision rule is [`CriticValidation::passes`], applied unchanged
//! - Non-blocking on outage: a failed call yields a conservative result that
//!   keeps the run alive and carries the issue `"validation unavailable"`
//! - Malformed critic output fails closed (`is_valid = false`, risk 0.7)
//!
//! ## NOT Responsible For
//! - Whether a failed gate blocks actions (orchestrator policy)
//! - Retrying investigation

use std::sync::Arc;

use tracing::{info, warn};

use crate::model::{Anomaly, CriticValidation, Diagnosis, HistoricalIncident};
use crate::pipeline::parse::{parse_json, CriticResponse};
use crate::pipeline::prompts;
use crate::ports::text::TextGenerator;

pub const ISSUE_UNAVAILABLE: &str = "validation unavailable";
pub const ISSUE_PARSE: &str = "Failed to parse critic response";
pub const ISSUE_NO_DIAGNOSIS: &str = "No diagnosis to validate";

/// Per-lock view of a validation, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Passed,
    Failed,
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockStatus::Passed => write!(f, "PASS"),
            LockStatus::Failed => write!(f, "FAIL"),
        }
    }
}

fn lock(ok: bool) -> LockStatus {
    if ok {
        LockStatus::Passed
    } else {
        LockStatus::Failed
    }
}

/// `[(lock name, status)]` in check order. The hallucination lock reads the
/// standard `< 0.5` threshold.
pub fn lock_report(v: &CriticValidation) -> [(&'static str, LockStatus); 3] {
    [
        ("data_grounding", lock(v.data_grounded)),
        ("evidence_verification", lock(v.evidence_verified)),
        ("hallucination_score", lock(v.hallucination_risk < 0.5)),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub validation: CriticValidation,
    pub passed: bool,
}

impl GateOutcome {
    fn from_validation(validation: CriticValidation) -> Self {
        let passed = validation.passes();
        Self { validation, passed }
    }
}

pub struct ValidationGate {
    critic: Arc<dyn TextGenerator>,
}

impl ValidationGate {
    pub fn new(critic: Arc<dyn TextGenerator>) -> Self {
        Self { critic }
    }

    pub async fn validate(
        &self,
        diagnosis: Option<&Diagnosis>,
        anomaly: Option<&Anomaly>,
        evidence: &str,
        incidents: &[HistoricalIncident],
    ) -> GateOutcome {
        let Some(diagnosis) = diagnosis else {
            warn!("validate reached without a diagnosis");
            return GateOutcome::from_validation(no_diagnosis());
        };
        let prompt = prompts::critic_prompt(anomaly, evidence, incidents, diagnosis);
        let validation = match self.critic.complete(prompts::CRITIC_SYSTEM, &prompt).await {
            Ok(text) => parse_validation(&text),
            Err(e) => {
                warn!(error = %e, "critic unavailable; using conservative validation");
                unavailable()
            }
        };
        let outcome = GateOutcome::from_validation(validation);
        info!(
            passed = outcome.passed,
            risk = outcome.validation.hallucination_risk,
            grounded = outcome.validation.data_grounded,
            issues = outcome.validation.issues.len(),
            "triple-lock validation"
        );
        outcome
    }
}

/// Parse a critic response; malformed output fails closed.
pub fn parse_validation(text: &str) -> CriticValidation {
    match parse_json::<CriticResponse>(text) {
        Ok(r) => {
            let risk = r.hallucination_risk.unwrap_or(0.5).clamp(0.0, 1.0);
            CriticValidation {
                is_valid: r.is_valid,
                hallucination_risk: risk,
                data_grounded: r.data_grounded.unwrap_or(false),
                evidence_verified: r.evidence_verified.unwrap_or(false),
                issues: r.issues,
            }
        }
        Err(e) => {
            warn!(error = %e, "critic response not parseable");
            CriticValidation {
                is_valid: false,
                hallucination_risk: 0.7,
                data_grounded: false,
                evidence_verified: false,
                issues: vec![ISSUE_PARSE.to_string()],
            }
        }
    }
}

fn unavailable() -> CriticValidation {
    CriticValidation {
        is_valid: true,
        hallucination_risk: 0.5,
        data_grounded: true,
        evidence_verified: true,
        issues: vec![ISSUE_UNAVAILABLE.to_string()],
    }
}

fn no_diagnosis() -> CriticValidation {
    CriticValidation {
        is_valid: false,
        hallucination_risk: 1.0,
        data_grounded: false,
        evidence_verified: false,
        issues: vec![ISSUE_NO_DIAGNOSIS.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiagnosisSource, PersonaSummaries, RootCauseCategory};
    use crate::ports::text::ScriptedGenerator;
    use rstest::rstest;

    fn diagnosis() -> Diagnosis {
        Diagnosis {
            root_cause: "Competitor bidding on brand terms".into(),
            root_cause_category: RootCauseCategory::AuctionPressure,
            confidence: 0.8,
            supporting_evidence: vec!["CPC +32%".into()],
            recommended_actions: vec![],
            summaries: PersonaSummaries::default(),
            source: DiagnosisSource::Generated,
        }
    }

    fn gate(response: &str) -> ValidationGate {
        ValidationGate::new(Arc::new(ScriptedGenerator::new().with_rule("TRIPLE-LOCK", response)))
    }

    #[rstest]
    #[case(r#"{"is_valid": false, "hallucination_risk": 0.25, "data_grounded": false}"#, true)]
    #[case(r#"{"is_valid": true, "hallucination_risk": 0.26, "data_grounded": false}"#, false)]
    #[case(r#"{"is_valid": true, "hallucination_risk": 0.4, "data_grounded": true}"#, true)]
    #[case(r#"{"is_valid": true, "hallucination_risk": 0.5, "data_grounded": true}"#, false)]
    #[tokio::test]
    async fn test_gate_boundaries(#[case] response: &str, #[case] expected: bool) {
        let out = gate(response).validate(Some(&diagnosis()), None, "evidence", &[]).await;
        assert_eq!(out.passed, expected, "{response}");
    }

    #[tokio::test]
    async fn test_port_failure_is_conservative_and_nonblocking() {
        let out = ValidationGate::new(Arc::new(ScriptedGenerator::failing()))
            .validate(Some(&diagnosis()), None, "evidence", &[])
            .await;
        assert!(out.validation.is_valid);
        assert_eq!(out.validation.hallucination_risk, 0.5);
        assert_eq!(out.validation.issues, vec![ISSUE_UNAVAILABLE.to_string()]);
        // 0.5 is not below the standard threshold and above the override.
        assert!(!out.passed);
    }

    #[tokio::test]
    async fn test_unparseable_response_fails_closed() {
        let out = gate("looks fine to me").validate(Some(&diagnosis()), None, "evidence", &[]).await;
        assert!(!out.validation.is_valid);
        assert_eq!(out.validation.hallucination_risk, 0.7);
        assert_eq!(out.validation.issues, vec![ISSUE_PARSE.to_string()]);
        assert!(!out.passed);
    }

    #[tokio::test]
    async fn test_missing_diagnosis_never_calls_the_critic() {
        let gen = Arc::new(ScriptedGenerator::new().with_default("{}"));
        let out = ValidationGate::new(gen.clone()).validate(None, None, "evidence", &[]).await;
        assert!(!out.passed);
        assert_eq!(out.validation.issues, vec![ISSUE_NO_DIAGNOSIS.to_string()]);
        assert_eq!(gen.calls(), 0);
    }

    #[test]
    fn test_risk_is_clamped_and_lock_report_reads_flags() {
        let v = parse_validation(r#"{"is_valid": true, "hallucination_risk": 3, "data_grounded": true, "evidence_verified": false}"#);
        assert_eq!(v.hallucination_risk, 1.0);
        let report = lock_report(&v);
        assert_eq!(report[0], ("data_grounding", LockStatus::Passed));
        assert_eq!(report[1].1, LockStatus::Failed);
        assert_eq!(report[2].1, LockStatus::Failed);
    }
}
