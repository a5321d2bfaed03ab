//! Engine configuration.
//!
//! Loaded from a TOML file where every section and field is optional, then
//! overlaid with environment variables. Out of the box: z ≥ 2.0, k = 3,
//! advisory validation, sequential batch.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExpeditionError, Result};
use crate::model::Severity;
use crate::providers::Provider;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Minimum `|z|` for an observation to be reported. Default: 2.0.
    pub z_threshold: f64,
    /// Metrics inspected on every channel.
    pub tracked_metrics: Vec<String>,
    /// Baseline samples below this count trigger the extended lookback. Default: 7.
    pub min_baseline_points: usize,
    /// Size of the extended lookback, in points. Default: 30.
    pub fallback_lookback_points: usize,
    /// The current value must be at most this many days older than the
    /// window end. Default: 2.
    pub max_current_age_days: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.0,
            tracked_metrics: ["cpa", "spend", "roas", "conversions"].iter().map(|s| s.to_string()).collect(),
            min_baseline_points: 7,
            fallback_lookback_points: 30,
            max_current_age_days: 2,
        }
    }
}

/// Whether a failed validation gate stops action proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Record the failure and propose anyway.
    Advisory,
    /// Complete the run without proposing actions.
    Blocking,
}

impl ValidationPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "advisory" => Some(ValidationPolicy::Advisory),
            "blocking" => Some(ValidationPolicy::Blocking),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationPolicy::Advisory => write!(f, "advisory"),
            ValidationPolicy::Blocking => write!(f, "blocking"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum age of the metric store's last refresh. Default: 3600 s.
    pub max_staleness_secs: u64,
    /// Deadline for one whole run. Default: 120 s.
    pub run_timeout_secs: u64,
    pub validation_policy: ValidationPolicy,
    /// Extra investigate passes when the gate fails with risk above
    /// `retry_risk_threshold`. Default: 0.
    pub max_investigation_retries: u32,
    /// Default: 0.7.
    pub retry_risk_threshold: f64,
    /// Days of history the investigators summarise. Default: 14.
    pub investigation_lookback_days: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_staleness_secs: 3_600,
            run_timeout_secs: 120,
            validation_policy: ValidationPolicy::Advisory,
            max_investigation_retries: 0,
            retry_risk_threshold: 0.7,
            investigation_lookback_days: 14,
        }
    }
}

impl OrchestratorConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Neighbours requested from the incident index. Default: 3.
    pub top_k: usize,
    /// Dimension of the hash embedding used when no embedding backend is
    /// configured. Default: 768.
    pub embedding_dimension: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3, embedding_dimension: 768 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Marginal ROAS below which a channel counts as saturated. Default: 1.0.
    pub efficiency_floor: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self { efficiency_floor: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default: 86 400 s (one day).
    pub ttl_secs: u64,
    /// Default: 256 completed runs.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 86_400, capacity: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Default: 5.
    pub max_anomalies: usize,
    /// Default: medium.
    pub min_severity: Severity,
    /// Runs in flight at once. 1 keeps the batch sequential. Default: 1.
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_anomalies: 5, min_severity: Severity::Medium, max_concurrent: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Model for routing and investigation synthesis.
    pub fast_model: String,
    /// Model for explanation and validation.
    pub deep_model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Never read from the config file; filled from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Disabled,
            fast_model: "gpt-4o-mini".to_string(),
            deep_model: "gpt-4o".to_string(),
            timeout_secs: 60,
            max_tokens: 4_096,
            api_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ExpeditionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpeditionConfig {
    pub scanner: ScannerConfig,
    pub orchestrator: OrchestratorConfig,
    pub retrieval: RetrievalConfig,
    pub guardrail: GuardrailConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub llm: LlmConfig,
}

impl ExpeditionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ExpeditionConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ExpeditionError::io(path.display().to_string(), e))?;
        Self::from_toml_str(&raw)
    }

    /// File (when given) plus process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Recognised: `EXPEDITION_ZSCORE_THRESHOLD`, `EXPEDITION_RAG_TOP_K`,
    /// `EXPEDITION_VALIDATION_POLICY`, and the provider key
    /// (`OPENAI_API_KEY` / `ANTHROPIC_API_KEY`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("EXPEDITION_ZSCORE_THRESHOLD") {
            self.scanner.z_threshold = raw.trim().parse().map_err(|_| {
                ExpeditionError::Config(format!("EXPEDITION_ZSCORE_THRESHOLD is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("EXPEDITION_RAG_TOP_K") {
            self.retrieval.top_k = raw.trim().parse().map_err(|_| {
                ExpeditionError::Config(format!("EXPEDITION_RAG_TOP_K is not an integer: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("EXPEDITION_VALIDATION_POLICY") {
            self.orchestrator.validation_policy = ValidationPolicy::parse(&raw).ok_or_else(|| {
                ExpeditionError::Config(format!("EXPEDITION_VALIDATION_POLICY must be advisory|blocking, got {raw}"))
            })?;
        }
        if let Some(var) = self.llm.provider.api_key_var() {
            self.llm.api_key = lookup(var).filter(|k| !k.trim().is_empty());
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(ExpeditionError::Config(msg.to_string()));
        if !(self.scanner.z_threshold > 0.0) {
            return fail("scanner.z_threshold must be > 0");
        }
        if self.scanner.tracked_metrics.is_empty() {
            return fail("scanner.tracked_metrics must not be empty");
        }
        if self.scanner.min_baseline_points < 2 {
            return fail("scanner.min_baseline_points must be >= 2");
        }
        if self.retrieval.top_k == 0 || self.retrieval.embedding_dimension == 0 {
            return fail("retrieval.top_k and retrieval.embedding_dimension must be >= 1");
        }
        if self.batch.max_concurrent == 0 {
            return fail("batch.max_concurrent must be >= 1");
        }
        if self.cache.capacity == 0 {
            return fail("cache.capacity must be >= 1");
        }
        if self.guardrail.efficiency_floor < 0.0 {
            return fail("guardrail.efficiency_floor must be >= 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    // -- Defaults -----------------------------------------------------------

    #[test]
    fn test_defaults_are_valid() {
        let c = ExpeditionConfig::default();
        assert_eq!(c.scanner.z_threshold, 2.0);
        assert_eq!(c.scanner.tracked_metrics, vec!["cpa", "spend", "roas", "conversions"]);
        assert_eq!(c.retrieval.top_k, 3);
        assert_eq!(c.orchestrator.max_staleness_secs, 3_600);
        assert_eq!(c.orchestrator.validation_policy, ValidationPolicy::Advisory);
        assert_eq!(c.batch.max_concurrent, 1);
        assert!(c.validate().is_ok());
    }

    // -- TOML ---------------------------------------------------------------

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let c = ExpeditionConfig::from_toml_str(
            "[scanner]\nz_threshold = 3.0\n\n[orchestrator]\nvalidation_policy = \"blocking\"\n",
        )
        .unwrap();
        assert_eq!(c.scanner.z_threshold, 3.0);
        assert_eq!(c.scanner.min_baseline_points, 7);
        assert_eq!(c.orchestrator.validation_policy, ValidationPolicy::Blocking);
        assert_eq!(c.retrieval.top_k, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ExpeditionConfig::from_toml_str("[batch]\nmax_concurrent = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent"), "got: {err}");
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[retrieval]\ntop_k = 5").unwrap();
        let c = ExpeditionConfig::load(f.path()).unwrap();
        assert_eq!(c.retrieval.top_k, 5);
    }

    #[test]
    fn test_bundled_sample_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/expedition.toml");
        let c = ExpeditionConfig::load(&path).unwrap();
        assert_eq!(c.orchestrator.max_investigation_retries, 1);
        assert_eq!(c.batch.max_concurrent, 2);
        assert_eq!(c.batch.min_severity, Severity::Medium);
        assert_eq!(c.llm.provider, Provider::Disabled);
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = ExpeditionConfig::load(Path::new("/nonexistent/expedition.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/expedition.toml"));
    }

    // -- Environment --------------------------------------------------------

    #[test]
    fn test_env_overrides_apply() {
        let mut c = ExpeditionConfig::default();
        c.apply_env(env(&[
            ("EXPEDITION_ZSCORE_THRESHOLD", "2.5"),
            ("EXPEDITION_RAG_TOP_K", "4"),
            ("EXPEDITION_VALIDATION_POLICY", "Blocking"),
        ]))
        .unwrap();
        assert_eq!(c.scanner.z_threshold, 2.5);
        assert_eq!(c.retrieval.top_k, 4);
        assert_eq!(c.orchestrator.validation_policy, ValidationPolicy::Blocking);
    }

    #[test]
    fn test_env_bad_number_is_config_error() {
        let mut c = ExpeditionConfig::default();
        let err = c.apply_env(env(&[("EXPEDITION_RAG_TOP_K", "three")])).unwrap_err();
        assert!(matches!(err, ExpeditionError::Config(_)));
    }

    #[test]
    fn test_api_key_read_for_selected_provider_only() {
        let mut c = ExpeditionConfig::default();
        c.llm.provider = Provider::Anthropic;
        c.apply_env(env(&[("OPENAI_API_KEY", "sk-o"), ("ANTHROPIC_API_KEY", "sk-a")])).unwrap();
        assert_eq!(c.llm.api_key.as_deref(), Some("sk-a"));
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let mut c = ExpeditionConfig::default();
        c.llm.provider = Provider::Openai;
        c.apply_env(env(&[("OPENAI_API_KEY", "  ")])).unwrap();
        assert!(c.llm.api_key.is_none());
    }
}
