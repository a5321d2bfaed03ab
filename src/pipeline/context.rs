//! Run state threaded through the stage graph.
//!
//! Stages never touch [`RunContext`] directly: each returns a
//! [`RunContextDelta`] variant that can only carry the fields that stage owns,
//! and [`RunContext::merge`] is the single place those fields are written.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::ActionProposal;
use crate::model::{AnalysisWindow, Anomaly, ChannelCategory, CriticValidation, Diagnosis, HistoricalIncident};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Detect,
    Route,
    InvestigatePaidMedia,
    InvestigateInfluencer,
    InvestigateOffline,
    RetrieveContext,
    Explain,
    Validate,
    Propose,
    Abort,
    NoAnomalies,
    Complete,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Abort | Stage::NoAnomalies | Stage::Complete)
    }

    pub fn investigate(category: ChannelCategory) -> Self {
        match category {
            ChannelCategory::PaidMedia  => Stage::InvestigatePaidMedia,
            ChannelCategory::Influencer => Stage::InvestigateInfluencer,
            ChannelCategory::Offline    => Stage::InvestigateOffline,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Preflight             => write!(f, "preflight"),
            Stage::Detect                => write!(f, "detect"),
            Stage::Route                 => write!(f, "route"),
            Stage::InvestigatePaidMedia  => write!(f, "investigate_paid_media"),
            Stage::InvestigateInfluencer => write!(f, "investigate_influencer"),
            Stage::InvestigateOffline    => write!(f, "investigate_offline"),
            Stage::RetrieveContext       => write!(f, "retrieve_context"),
            Stage::Explain               => write!(f, "explain"),
            Stage::Validate              => write!(f, "validate"),
            Stage::Propose               => write!(f, "propose"),
            Stage::Abort                 => write!(f, "abort"),
            Stage::NoAnomalies           => write!(f, "no_anomalies"),
            Stage::Complete              => write!(f, "complete"),
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal status
// ---------------------------------------------------------------------------

/// How a run ended. `Running` only appears on contexts still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Preflight failed; no diagnosis was attempted.
    Aborted { reason: String },
    /// Nothing to investigate.
    NoSignal,
    Completed {
        validation_passed: bool,
        /// Blocking policy suppressed action proposal.
        actions_withheld: bool,
    },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Aborted { reason } => write!(f, "aborted: {reason}"),
            RunStatus::NoSignal => write!(f, "no_anomalies"),
            RunStatus::Completed { validation_passed: true, .. } => write!(f, "completed"),
            RunStatus::Completed { actions_withheld: true, .. } => write!(f, "completed (validation failed, actions withheld)"),
            RunStatus::Completed { .. } => write!(f, "completed (validation failed)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// Output of one stage. Each variant lists exactly the fields its stage owns.
#[derive(Debug, Clone, PartialEq)]
pub enum RunContextDelta {
    Preflight { passed: bool, error: Option<String> },
    Detect { anomalies: Vec<Anomaly>, selected: Option<Anomaly> },
    Route { category: ChannelCategory, via_fallback: bool },
    Investigate { evidence: String, summary: String, degraded: bool },
    RetrieveContext { incidents: Vec<HistoricalIncident>, degraded: bool, embedding_fallback: bool },
    Explain { diagnosis: Diagnosis },
    Validate { validation: CriticValidation, passed: bool },
    Propose { actions: Vec<ActionProposal> },
}

impl RunContextDelta {
    pub fn stage_name(&self) -> &'static str {
        match self {
            RunContextDelta::Preflight { .. }       => "preflight",
            RunContextDelta::Detect { .. }          => "detect",
            RunContextDelta::Route { .. }           => "route",
            RunContextDelta::Investigate { .. }     => "investigate",
            RunContextDelta::RetrieveContext { .. } => "retrieve_context",
            RunContextDelta::Explain { .. }         => "explain",
            RunContextDelta::Validate { .. }        => "validate",
            RunContextDelta::Propose { .. }         => "propose",
        }
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub window: AnalysisWindow,
    pub status: RunStatus,
    pub preflight_error: Option<String>,
    /// Every anomaly the detect stage saw (just the pinned one when pinned).
    pub anomalies: Vec<Anomaly>,
    pub selected: Option<Anomaly>,
    pub category: Option<ChannelCategory>,
    pub evidence: String,
    pub investigation_summary: String,
    pub incidents: Vec<HistoricalIncident>,
    pub diagnosis: Option<Diagnosis>,
    pub validation: Option<CriticValidation>,
    pub validation_passed: Option<bool>,
    pub actions: Vec<ActionProposal>,
    /// Validation issues surfaced to the caller.
    pub issues: Vec<String>,
    /// Ports that failed and were replaced by a fallback, e.g. `"context:index"`.
    pub degradations: Vec<String>,
    pub stage_trace: Vec<Stage>,
    pub investigation_attempts: u32,
    /// Served from the run cache; no stage after detect ran.
    #[serde(default)]
    pub from_cache: bool,
}

impl RunContext {
    pub fn new(window: AnalysisWindow) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            window,
            status: RunStatus::Running,
            preflight_error: None,
            anomalies: Vec::new(),
            selected: None,
            category: None,
            evidence: String::new(),
            investigation_summary: String::new(),
            incidents: Vec::new(),
            diagnosis: None,
            validation: None,
            validation_passed: None,
            actions: Vec::new(),
            issues: Vec::new(),
            degradations: Vec::new(),
            stage_trace: Vec::new(),
            investigation_attempts: 0,
            from_cache: false,
        }
    }

    fn degrade(&mut self, flag: &str) {
        if !self.degradations.iter().any(|d| d == flag) {
            self.degradations.push(flag.to_string());
        }
    }

    /// Apply a stage's output. The only writer of stage-owned fields.
    pub fn merge(&mut self, delta: RunContextDelta) {
        match delta {
            RunContextDelta::Preflight { passed, error } => {
                self.preflight_error = match (passed, error) {
                    (false, None) => Some("preflight failed".to_string()),
                    (_, error) => error,
                };
            }
            RunContextDelta::Detect { anomalies, selected } => {
                self.anomalies = anomalies;
                self.selected = selected;
            }
            RunContextDelta::Route { category, via_fallback } => {
                self.category = Some(category);
                if via_fallback {
                    self.degrade("route:classifier");
                }
            }
            RunContextDelta::Investigate { evidence, summary, degraded } => {
                self.evidence = evidence;
                self.investigation_summary = summary;
                self.investigation_attempts += 1;
                if degraded {
                    self.degrade("investigate:text_generation");
                }
            }
            RunContextDelta::RetrieveContext { incidents, degraded, embedding_fallback } => {
                self.incidents = incidents;
                if degraded {
                    self.degrade("context:index");
                }
                if embedding_fallback {
                    self.degrade("context:embedding");
                }
            }
            RunContextDelta::Explain { diagnosis } => {
                if diagnosis.source != crate::model::DiagnosisSource::Generated {
                    self.degrade("explain:text_generation");
                }
                self.diagnosis = Some(diagnosis);
            }
            RunContextDelta::Validate { validation, passed } => {
                if validation.issues.iter().any(|i| i == crate::gate::ISSUE_UNAVAILABLE) {
                    self.degrade("validate:text_generation");
                }
                self.issues = validation.issues.clone();
                self.validation_passed = Some(passed);
                self.validation = Some(validation);
            }
            RunContextDelta::Propose { actions } => {
                self.actions = actions;
            }
        }
    }

    /// Evidence handed to the explainer and critic: the analyst summary
    /// followed by the raw evidence it was built from.
    pub fn evidence_for_review(&self) -> String {
        if self.investigation_summary.is_empty() || self.investigation_summary == self.evidence {
            self.evidence.clone()
        } else {
            format!("## Analyst Summary\n{}\n\n{}", self.investigation_summary, self.evidence)
        }
    }
}
