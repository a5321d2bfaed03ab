//! # expedition
//!
//! Diagnostic orchestration for marketing-metric anomalies. A run scans
//! channel metrics for statistical outliers, routes the selected anomaly to a
//! channel-specific investigation, pulls comparable past incidents without
//! leaking anything dated after the analysis window, asks a model for a root
//! cause, checks that answer with an independent critic, and finally proposes
//! guarded remediation actions.
//!
//! ```text
//! Scanner ─► Orchestrator ─► Investigator ─► Retriever ─► Explainer ─► ValidationGate ─► ActionEngine
//!                 │                                                                          │
//!                 └───────────────────────────── RunCache ◄──────────────────────────────────┘
//! ```
//!
//! Every collaborator sits behind a trait in [`ports`]. Port failures never
//! abort a run; each stage degrades to a labelled fallback and the run records
//! which stages degraded.

pub mod actions;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod model;
pub mod pipeline;
pub mod ports;
pub mod providers;
pub mod retriever;
pub mod scanner;

pub use actions::{ActionEngine, ActionKey, ActionProposal, SaturationGuardrail};
pub use batch::{BatchReport, BatchRunner};
pub use cache::{RunCache, RunKey};
pub use config::{ExpeditionConfig, ValidationPolicy};
pub use error::{ExpeditionError, PortError, Result};
pub use gate::{GateOutcome, ValidationGate};
pub use model::{AnalysisWindow, Anomaly, CriticValidation, Diagnosis, HistoricalIncident, Severity};
pub use pipeline::{Orchestrator, Ports, RunContext, RunStatus, Stage};
pub use retriever::HistoricalRetriever;
pub use scanner::Scanner;
