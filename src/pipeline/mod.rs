//! The diagnostic stage graph and the stages that only it runs.

pub mod context;
pub mod explainer;
pub mod investigator;
pub mod orchestrator;
pub mod parse;
pub mod prompts;
pub mod router;

pub use context::{RunContext, RunContextDelta, RunStatus, Stage};
pub use orchestrator::{next_stage, Orchestrator, Ports, SharedRunCache};
