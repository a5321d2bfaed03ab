//! Boundaries to external collaborators.
//!
//! Every port is a trait object so stages can be exercised against scripted
//! doubles; the in-crate implementations cover offline use.

pub mod embedding;
pub mod executor;
pub mod index;
pub mod snapshot;
pub mod sources;
pub mod text;

pub use embedding::{Embedder, HashEmbedder};
pub use executor::{DryRunExecutor, ExecutionResult, ExecutionStatus, Executor};
pub use index::{IncidentIndex, IncidentRecord, InMemoryIncidentIndex, IndexFilter, IndexHit};
pub use snapshot::{Snapshot, SnapshotStore};
pub use sources::{MarketSource, MetricStore, StrategySource};
pub use text::{ModelTiers, TextGenerator, UnavailableGenerator};
