//! # Stage Orchestrator
//!
//! Drives one diagnostic run through the stage graph:
//!
//! ```text
//! preflight ──► detect ──► route ──► investigate_{paid_media|influencer|offline}
//!    │             │                          ▲                 │
//!    ▼             ▼                          │ (retry)         ▼
//!  abort     no_anomalies                     │         retrieve_context
//!                                             │                 │
//!                          complete ◄── propose ◄── validate ◄── explain
//!                              ▲                       │
//!                              └──── (blocking) ───────┘
//! ```
//!
//! ## Guarantees
//! - Stages return a [`RunContextDelta`]; only this module merges them and
//!   only [`next_stage`] decides transitions
//! - Only preflight can stop a run; every port failure degrades to a
//!   labelled fallback recorded in `degradations`
//! - The whole run is bounded by `run_timeout_secs`
//! - A completed, fully-formed run is cached under `(anomaly id, window)`;
//!   a cache hit returns the stored context without calling any model.
//!   Runs with any degradation or a fallback diagnosis are never cached
//!
//! ## NOT Responsible For
//! - Executing proposed actions
//! - Running several anomalies (see [`crate::batch`])

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::context::{RunContext, RunContextDelta, RunStatus, Stage};
use super::explainer::Explainer;
use super::investigator::{EvidenceSources, Investigator};
use super::router::{RouteSource, Router};
use crate::actions::{ActionEngine, SaturationGuardrail};
use crate::cache::{now_ms, RunCache, RunKey};
use crate::config::{ExpeditionConfig, OrchestratorConfig, ValidationPolicy};
use crate::error::{ExpeditionError, Result};
use crate::gate::ValidationGate;
use crate::model::{AnalysisWindow, Anomaly, DiagnosisSource};
use crate::ports::embedding::Embedder;
use crate::ports::index::IncidentIndex;
use crate::ports::sources::{MarketSource, MetricStore, StrategySource};
use crate::ports::text::ModelTiers;
use crate::retriever::HistoricalRetriever;
use crate::scanner::Scanner;

/// Run cache shared between runs, e.g. across a batch.
pub type SharedRunCache = Arc<Mutex<RunCache<RunContext>>>;

/// Every collaborator a run needs.
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn MetricStore>,
    pub market: Arc<dyn MarketSource>,
    pub strategy: Arc<dyn StrategySource>,
    pub tiers: ModelTiers,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn IncidentIndex>,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Where the run goes after `stage`, given the merged context.
pub fn next_stage(stage: Stage, ctx: &RunContext, config: &OrchestratorConfig) -> Stage {
    match stage {
        Stage::Preflight if ctx.preflight_error.is_some() => Stage::Abort,
        Stage::Preflight => Stage::Detect,
        Stage::Detect if ctx.selected.is_some() => Stage::Route,
        Stage::Detect => Stage::NoAnomalies,
        Stage::Route => match ctx.category {
            Some(category) => Stage::investigate(category),
            None => Stage::InvestigatePaidMedia,
        },
        Stage::InvestigatePaidMedia | Stage::InvestigateInfluencer | Stage::InvestigateOffline => {
            Stage::RetrieveContext
        }
        Stage::RetrieveContext => Stage::Explain,
        Stage::Explain => Stage::Validate,
        Stage::Validate => {
            if ctx.validation_passed == Some(true) {
                return Stage::Propose;
            }
            let risk = ctx.validation.as_ref().map(|v| v.hallucination_risk).unwrap_or(0.0);
            let retries_used = ctx.investigation_attempts.saturating_sub(1);
            if risk > config.retry_risk_threshold && retries_used < config.max_investigation_retries {
                if let Some(category) = ctx.category {
                    return Stage::investigate(category);
                }
            }
            match config.validation_policy {
                ValidationPolicy::Advisory => Stage::Propose,
                ValidationPolicy::Blocking => Stage::Complete,
            }
        }
        Stage::Propose => Stage::Complete,
        Stage::Abort | Stage::NoAnomalies | Stage::Complete => stage,
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<dyn MetricStore>,
    scanner: Scanner,
    router: Router,
    investigator: Investigator,
    retriever: HistoricalRetriever,
    explainer: Explainer,
    gate: ValidationGate,
    engine: ActionEngine,
    cache: SharedRunCache,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(ports: Ports, config: &ExpeditionConfig) -> Self {
        let Ports { store, market, strategy, tiers, embedder, index } = ports;
        let guardrail = SaturationGuardrail::new(Arc::clone(&strategy), config.guardrail.efficiency_floor);
        let sources = EvidenceSources { store: Arc::clone(&store), market, strategy };
        Self {
            scanner: Scanner::new(config.scanner.clone()),
            router: Router::new(Arc::clone(&tiers.fast)),
            investigator: Investigator::new(
                sources,
                Arc::clone(&tiers.fast),
                config.scanner.tracked_metrics.clone(),
                config.orchestrator.investigation_lookback_days,
            ),
            retriever: HistoricalRetriever::new(embedder, index, config.retrieval.top_k),
            explainer: Explainer::new(Arc::clone(&tiers.deep)),
            gate: ValidationGate::new(tiers.deep),
            engine: ActionEngine::new(Some(guardrail)),
            cache: Arc::new(Mutex::new(RunCache::new(&config.cache))),
            config: config.orchestrator.clone(),
            store,
        }
    }

    /// Share a cache with other orchestrators.
    pub fn with_cache(mut self, cache: SharedRunCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> SharedRunCache {
        Arc::clone(&self.cache)
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn store(&self) -> &dyn MetricStore {
        self.store.as_ref()
    }

    /// Run the stage graph once.
    ///
    /// `selected` pins the anomaly to investigate and skips scanning; it is
    /// trusted as given. Without it the top-severity scan result is used.
    ///
    /// # Errors
    /// Only [`ExpeditionError::RunTimedOut`]. Every other failure ends in a
    /// terminal [`RunStatus`] on the returned context.
    pub async fn run_diagnosis(&self, selected: Option<Anomaly>, window: AnalysisWindow) -> Result<RunContext> {
        let mut ctx = RunContext::new(window);
        let run_id = ctx.run_id.clone();
        info!(run_id = %run_id, %window, pinned = selected.is_some(), "run started");
        match tokio::time::timeout(self.config.run_timeout(), self.drive(&mut ctx, selected)).await {
            Ok(()) => {
                info!(run_id = %ctx.run_id, status = %ctx.status, from_cache = ctx.from_cache, "run finished");
                Ok(ctx)
            }
            Err(_) => {
                warn!(run_id = %run_id, secs = self.config.run_timeout_secs, "run timed out");
                Err(ExpeditionError::RunTimedOut { run_id, secs: self.config.run_timeout_secs })
            }
        }
    }

    async fn drive(&self, ctx: &mut RunContext, pinned: Option<Anomaly>) {
        let mut stage = Stage::Preflight;
        let mut withheld = false;
        while !stage.is_terminal() {
            ctx.stage_trace.push(stage);
            debug!(run_id = %ctx.run_id, %stage, "stage start");
            if let Some(delta) = self.execute(stage, ctx, pinned.as_ref()).await {
                ctx.merge(delta);
            }

            if stage == Stage::Detect {
                if let Some(hit) = self.cached(ctx) {
                    *ctx = hit;
                    return;
                }
            }

            let next = next_stage(stage, ctx, &self.config);
            if stage == Stage::Validate && next == Stage::Complete {
                withheld = true;
                warn!(run_id = %ctx.run_id, "validation failed under blocking policy; actions withheld");
            }
            if stage == Stage::Validate && matches!(next, Stage::InvestigatePaidMedia | Stage::InvestigateInfluencer | Stage::InvestigateOffline) {
                info!(run_id = %ctx.run_id, attempt = ctx.investigation_attempts + 1, "high-risk diagnosis; re-investigating");
            }
            stage = next;
        }
        ctx.stage_trace.push(stage);

        ctx.status = match stage {
            Stage::Abort => RunStatus::Aborted {
                reason: ctx.preflight_error.clone().unwrap_or_else(|| "preflight failed".to_string()),
            },
            Stage::NoAnomalies => RunStatus::NoSignal,
            _ => RunStatus::Completed {
                validation_passed: ctx.validation_passed.unwrap_or(false),
                actions_withheld: withheld,
            },
        };
        if matches!(ctx.status, RunStatus::Completed { .. }) {
            self.store_completed(ctx);
        }
    }

    async fn execute(&self, stage: Stage, ctx: &RunContext, pinned: Option<&Anomaly>) -> Option<RunContextDelta> {
        match stage {
            Stage::Preflight => Some(self.preflight()),
            Stage::Detect => Some(self.detect(&ctx.window, pinned)),
            Stage::Route => {
                let anomaly = ctx.selected.as_ref()?;
                let decision = self.router.route(&anomaly.channel).await;
                info!(run_id = %ctx.run_id, channel = %anomaly.channel, category = %decision.category, "routed");
                Some(RunContextDelta::Route {
                    category: decision.category,
                    via_fallback: decision.source == RouteSource::Default,
                })
            }
            Stage::InvestigatePaidMedia | Stage::InvestigateInfluencer | Stage::InvestigateOffline => {
                let anomaly = ctx.selected.as_ref()?;
                let category = ctx.category?;
                let inv = self.investigator.investigate(anomaly, category, &ctx.window).await;
                Some(RunContextDelta::Investigate { evidence: inv.evidence, summary: inv.summary, degraded: inv.degraded })
            }
            Stage::RetrieveContext => {
                let anomaly = ctx.selected.as_ref()?;
                let cutoff = HistoricalRetriever::resolve_cutoff(Some(&ctx.window), Some(anomaly));
                let outcome = self.retriever.for_anomaly(anomaly, cutoff).await;
                Some(RunContextDelta::RetrieveContext {
                    incidents: outcome.incidents,
                    degraded: outcome.degraded,
                    embedding_fallback: outcome.embedding_fallback,
                })
            }
            Stage::Explain => {
                let anomaly = ctx.selected.as_ref()?;
                let diagnosis = self.explainer.explain(anomaly, &ctx.evidence_for_review(), &ctx.incidents).await;
                Some(RunContextDelta::Explain { diagnosis })
            }
            Stage::Validate => {
                let outcome = self
                    .gate
                    .validate(ctx.diagnosis.as_ref(), ctx.selected.as_ref(), &ctx.evidence_for_review(), &ctx.incidents)
                    .await;
                Some(RunContextDelta::Validate { validation: outcome.validation, passed: outcome.passed })
            }
            Stage::Propose => {
                let anomaly = ctx.selected.as_ref()?;
                let category = ctx.category.unwrap_or(crate::model::ChannelCategory::PaidMedia);
                let actions = self.engine.propose(ctx.diagnosis.as_ref(), anomaly, &ctx.window, category).await;
                info!(run_id = %ctx.run_id, actions = actions.len(), "actions proposed");
                Some(RunContextDelta::Propose { actions })
            }
            Stage::Abort | Stage::NoAnomalies | Stage::Complete => None,
        }
    }

    fn preflight(&self) -> RunContextDelta {
        let error = if !self.store.health() {
            Some("metric store reports unhealthy".to_string())
        } else {
            match self.store.last_refreshed() {
                None => Some("metric store freshness unknown".to_string()),
                Some(refreshed) => {
                    let age = (Utc::now() - refreshed).num_seconds().max(0);
                    let max = i64::try_from(self.config.max_staleness_secs).unwrap_or(i64::MAX);
                    (age > max).then(|| format!("metric data is stale: last refresh {age}s ago exceeds {max}s"))
                }
            }
        };
        if let Some(e) = &error {
            warn!(reason = %e, "preflight failed");
        }
        RunContextDelta::Preflight { passed: error.is_none(), error }
    }

    fn detect(&self, window: &AnalysisWindow, pinned: Option<&Anomaly>) -> RunContextDelta {
        if let Some(a) = pinned {
            return RunContextDelta::Detect { anomalies: vec![a.clone()], selected: Some(a.clone()) };
        }
        let anomalies = self.scanner.scan_all(self.store.as_ref(), window);
        let selected = anomalies.first().cloned();
        info!(found = anomalies.len(), selected = selected.as_ref().map(|a| a.id.as_str()).unwrap_or("none"), "scan complete");
        RunContextDelta::Detect { anomalies, selected }
    }

    fn cached(&self, ctx: &RunContext) -> Option<RunContext> {
        let anomaly = ctx.selected.as_ref()?;
        let key = RunKey::new(&anomaly.id, ctx.window);
        let mut hit = self.cache.lock().ok()?.get(&key, now_ms())?;
        info!(run_id = %ctx.run_id, cached_run = %hit.run_id, key = %key, "run cache hit");
        hit.from_cache = true;
        Some(hit)
    }

    fn store_completed(&self, ctx: &RunContext) {
        let Some(anomaly) = ctx.selected.as_ref() else { return };
        if !is_fully_formed(ctx) {
            debug!(run_id = %ctx.run_id, degradations = ?ctx.degradations, "degraded run not cached");
            return;
        }
        let key = RunKey::new(&anomaly.id, ctx.window);
        match self.cache.lock() {
            Ok(mut cache) => cache.insert(key, ctx.clone(), now_ms()),
            Err(_) => warn!(run_id = %ctx.run_id, "run cache poisoned; result not cached"),
        }
    }
}

/// No port fell back and the diagnosis came from the model.
fn is_fully_formed(ctx: &RunContext) -> bool {
    ctx.degradations.is_empty()
        && ctx.diagnosis.as_ref().is_some_and(|d| d.source == DiagnosisSource::Generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelCategory, CriticValidation};
    use chrono::NaiveDate;

    fn ctx() -> RunContext {
        RunContext::new(AnalysisWindow::ending(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(), 15))
    }

    fn validated(mut c: RunContext, passed: bool, risk: f64) -> RunContext {
        c.category = Some(ChannelCategory::Offline);
        c.investigation_attempts = 1;
        c.validation_passed = Some(passed);
        c.validation = Some(CriticValidation {
            is_valid: passed,
            hallucination_risk: risk,
            data_grounded: passed,
            evidence_verified: passed,
            issues: vec![],
        });
        c
    }

    #[test]
    fn test_only_clean_generated_runs_are_cacheable() {
        use crate::pipeline::explainer::parse_diagnosis;

        let mut c = ctx();
        assert!(!is_fully_formed(&c));

        c.diagnosis = Some(parse_diagnosis(r#"{"root_cause": "Competitor bidding on brand terms", "confidence": 0.8}"#));
        assert!(is_fully_formed(&c));

        c.degradations.push("context:index".into());
        assert!(!is_fully_formed(&c));

        c.degradations.clear();
        c.diagnosis = Some(parse_diagnosis("not a diagnosis"));
        assert!(!is_fully_formed(&c));
    }

    #[test]
    fn test_preflight_error_aborts() {
        let mut c = ctx();
        let cfg = OrchestratorConfig::default();
        assert_eq!(next_stage(Stage::Preflight, &c, &cfg), Stage::Detect);
        c.preflight_error = Some("stale".into());
        assert_eq!(next_stage(Stage::Preflight, &c, &cfg), Stage::Abort);
    }

    #[test]
    fn test_detect_without_selection_ends_quietly() {
        assert_eq!(next_stage(Stage::Detect, &ctx(), &OrchestratorConfig::default()), Stage::NoAnomalies);
    }

    #[test]
    fn test_route_follows_category() {
        let mut c = ctx();
        c.category = Some(ChannelCategory::Influencer);
        assert_eq!(next_stage(Stage::Route, &c, &OrchestratorConfig::default()), Stage::InvestigateInfluencer);
    }

    #[test]
    fn test_failed_validation_is_advisory_by_default() {
        let c = validated(ctx(), false, 0.9);
        assert_eq!(next_stage(Stage::Validate, &c, &OrchestratorConfig::default()), Stage::Propose);
    }

    #[test]
    fn test_blocking_policy_completes_without_propose() {
        let cfg = OrchestratorConfig { validation_policy: ValidationPolicy::Blocking, ..Default::default() };
        let c = validated(ctx(), false, 0.6);
        assert_eq!(next_stage(Stage::Validate, &c, &cfg), Stage::Complete);
        let ok = validated(ctx(), true, 0.1);
        assert_eq!(next_stage(Stage::Validate, &ok, &cfg), Stage::Propose);
    }

    #[test]
    fn test_high_risk_retries_same_branch_until_budget_spent() {
        let cfg = OrchestratorConfig { max_investigation_retries: 1, ..Default::default() };
        let mut c = validated(ctx(), false, 0.9);
        assert_eq!(next_stage(Stage::Validate, &c, &cfg), Stage::InvestigateOffline);
        c.investigation_attempts = 2;
        assert_eq!(next_stage(Stage::Validate, &c, &cfg), Stage::Propose);
    }

    #[test]
    fn test_risk_at_threshold_does_not_retry() {
        let cfg = OrchestratorConfig { max_investigation_retries: 3, ..Default::default() };
        let c = validated(ctx(), false, 0.7);
        assert_eq!(next_stage(Stage::Validate, &c, &cfg), Stage::Propose);
    }

    #[test]
    fn test_linear_edges() {
        let cfg = OrchestratorConfig::default();
        let c = ctx();
        assert_eq!(next_stage(Stage::InvestigatePaidMedia, &c, &cfg), Stage::RetrieveContext);
        assert_eq!(next_stage(Stage::RetrieveContext, &c, &cfg), Stage::Explain);
        assert_eq!(next_stage(Stage::Explain, &c, &cfg), Stage::Validate);
        assert_eq!(next_stage(Stage::Propose, &c, &cfg), Stage::Complete);
    }
}
