//! # Stage: Action Proposal
//!
//! ## Responsibility
//! Turn a diagnosis into a deduplicated, guardrail-filtered list of
//! [`ActionProposal`]s for the selected anomaly.
//!
//! Steps, in order:
//! 1. Categorise the root cause and take the category's allow-list.
//! 2. Add actions triggered by the free-text recommendations; offline
//!    channels add vendor/measurement actions and lose programmatic levers;
//!    a spiking cost metric turns implicit increases into decreases.
//! 3. Deduplicate on `(action_type, operation)`, first seen wins.
//! 4. Swap increases on saturated channels for manual review.
//! 5. Emit a single manual-review action when nothing survived.
//!
//! ## Guarantees
//! - Never returns an empty list
//! - Idempotent: the same inputs (and strategy feed) give the same list,
//!   including action ids
//! - `requires_approval == (risk_level != low)` on every action
//!
//! ## NOT Responsible For
//! - Executing anything (see [`crate::ports::executor`])

use std::collections::{BTreeMap, HashSet};

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use super::classifier::{allowed_actions, categorize, hint_triggers, is_cost_metric, offline_triggers};
use super::guardrail::{GuardrailVerdict, SaturationGuardrail};
use super::{platform_for, ActionKey, ActionProposal};
use crate::model::{AnalysisWindow, Anomaly, ChannelCategory, Diagnosis, Direction, RiskLevel};

/// Manual-review parameter listing the increases the guardrail replaced.
pub const BLOCKED_ACTIONS: &str = "blocked_actions";
/// One reason per entry of [`BLOCKED_ACTIONS`].
pub const GUARDRAIL_REASONS: &str = "guardrail_reasons";

#[derive(Debug, Clone)]
struct Candidate {
    key: ActionKey,
    rationale: String,
    /// Named or implied by a recommendation rather than by the category table.
    explicit: bool,
}

pub struct ActionEngine {
    guardrail: Option<SaturationGuardrail>,
}

impl ActionEngine {
    pub fn new(guardrail: Option<SaturationGuardrail>) -> Self {
        Self { guardrail }
    }

    /// Engine without a strategy feed; increases pass unchecked.
    pub fn unguarded() -> Self {
        Self { guardrail: None }
    }

    pub async fn propose(
        &self,
        diagnosis: Option<&Diagnosis>,
        anomaly: &Anomaly,
        window: &AnalysisWindow,
        channel: ChannelCategory,
    ) -> Vec<ActionProposal> {
        let candidates = match diagnosis {
            Some(d) => Self::candidates(d, anomaly, channel),
            None => Vec::new(),
        };

        let mut proposals =
            dedup(candidates.into_iter().map(|c| build_proposal(c.key, anomaly, window, c.rationale)).collect());

        if let Some(guardrail) = &self.guardrail {
            if proposals.iter().any(|p| p.action_key.is_increase()) {
                let signal = guardrail.signal(&anomaly.channel, window.end).await;
                proposals = proposals
                    .into_iter()
                    .map(|p| match guardrail.assess(signal.as_ref(), p.action_key) {
                        GuardrailVerdict::Allow => p,
                        GuardrailVerdict::Replace { reason } => {
                            info!(channel = %anomaly.channel, blocked = %p.action_key, reason = %reason, "guardrail substituted manual review");
                            let mut review = build_proposal(ActionKey::ManualReview, anomaly, window, reason.clone());
                            review.parameters.insert(BLOCKED_ACTIONS.into(), vec![p.action_key.as_str()].into());
                            review.parameters.insert(GUARDRAIL_REASONS.into(), vec![reason].into());
                            review
                        }
                    })
                    .collect();
                proposals = dedup(proposals);
            }
        }

        if proposals.is_empty() {
            let why = if diagnosis.is_some() {
                "no specific action matched the diagnosis"
            } else {
                "no diagnosis available"
            };
            debug!(anomaly_id = %anomaly.id, why, "falling back to manual review");
            proposals.push(build_proposal(ActionKey::ManualReview, anomaly, window, why.to_string()));
        }
        proposals
    }

    /// Steps 1 and 2: ordered candidate keys before dedup.
    fn candidates(diagnosis: &Diagnosis, anomaly: &Anomaly, channel: ChannelCategory) -> Vec<Candidate> {
        let category = categorize(&diagnosis.root_cause);
        let mut out: Vec<Candidate> = allowed_actions(category)
            .iter()
            .map(|k| Candidate { key: *k, rationale: format!("root cause category {category}"), explicit: false })
            .collect();

        for hint in &diagnosis.recommended_actions {
            out.extend(hint_triggers(hint, channel).into_iter().map(|k| Candidate {
                key: k,
                rationale: format!("recommended: {hint}"),
                explicit: true,
            }));
        }

        if channel == ChannelCategory::Offline {
            let text = std::iter::once(diagnosis.root_cause.as_str())
                .chain(diagnosis.recommended_actions.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            let offline: Vec<Candidate> = offline_triggers(&text)
                .into_iter()
                .map(|k| Candidate { key: k, rationale: "offline delivery or measurement signal".into(), explicit: true })
                .collect();
            // Offline signals lead; programmatic levers do not exist offline.
            out = offline
                .into_iter()
                .chain(out)
                .filter(|c| !c.key.template().action_type.is_programmatic_lever())
                .collect();
        }

        if is_cost_metric(&anomaly.metric) && anomaly.direction == Direction::Spike {
            let explicit: HashSet<ActionKey> = out.iter().filter(|c| c.explicit).map(|c| c.key).collect();
            for c in out.iter_mut() {
                if c.key.is_increase() && !explicit.contains(&c.key) {
                    if let Some(down) = c.key.decrease_counterpart() {
                        c.rationale = format!(
                            "{}; {} already {:+.1}% above baseline so {down} preferred over {}",
                            c.rationale, anomaly.metric, anomaly.deviation_pct, c.key
                        );
                        c.key = down;
                    }
                }
            }
        }
        out
    }
}

/// Keep the first proposal for each `(action_type, operation)`. Guardrail
/// annotations of a dropped duplicate are folded into the survivor.
fn dedup(proposals: Vec<ActionProposal>) -> Vec<ActionProposal> {
    let mut out: Vec<ActionProposal> = Vec::with_capacity(proposals.len());
    for p in proposals {
        match out.iter_mut().find(|q| q.action_type == p.action_type && q.operation == p.operation) {
            Some(survivor) => merge_guardrail_notes(survivor, &p),
            None => out.push(p),
        }
    }
    out
}

fn merge_guardrail_notes(into: &mut ActionProposal, from: &ActionProposal) {
    for name in [BLOCKED_ACTIONS, GUARDRAIL_REASONS] {
        let Some(serde_json::Value::Array(extra)) = from.parameters.get(name) else {
            continue;
        };
        let slot = into.parameters.entry(name.to_string()).or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(list) = slot {
            for v in extra {
                if !list.contains(v) {
                    list.push(v.clone());
                }
            }
        }
    }
}

fn action_id(anomaly: &Anomaly, window: &AnalysisWindow, key: ActionKey) -> String {
    let digest = Sha1::digest(format!("{}|{}|{}", anomaly.id, window, key).as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("act_{hex}")
}

fn build_proposal(key: ActionKey, anomaly: &Anomaly, window: &AnalysisWindow, rationale: String) -> ActionProposal {
    let template = key.template();
    let mut parameters: BTreeMap<String, serde_json::Value> = template
        .default_params
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_json()))
        .collect();
    parameters.insert("anomaly_id".into(), anomaly.id.clone().into());
    parameters.insert("metric".into(), anomaly.metric.clone().into());

    ActionProposal {
        action_id: action_id(anomaly, window, key),
        action_key: key,
        action_type: template.action_type,
        platform: platform_for(&anomaly.channel),
        resource_id: format!("{}_campaign_primary", anomaly.channel),
        operation: template.operation.to_string(),
        parameters,
        risk_level: template.risk_level,
        requires_approval: template.risk_level != RiskLevel::Low,
        estimated_impact: template.estimated_impact.to_string(),
        rationale,
    }
}
