//! Error types for the diagnostic engine.
//!
//! Two layers:
//!
//! - [`PortError`]: a collaborator (text generation, embedding, index, data
//!   source) failed. Stages never propagate these; they convert them into a
//!   labelled fallback and record a degradation flag on the run.
//! - [`ExpeditionError`]: the crate surface: config loading, snapshot I/O,
//!   run timeouts.

use thiserror::Error;

/// Failure reported by an external collaborator.
///
/// Each variant carries enough context to diagnose the failure without
/// inspecting the originating error.
#[derive(Debug, Error)]
pub enum PortError {
    /// The collaborator is not configured or reported itself unhealthy.
    #[error("{port} unavailable: {detail}")]
    Unavailable { port: &'static str, detail: String },
    /// The remote service replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    /// The response body could not be decoded into the expected shape.
    #[error("decode error on '{field}': {detail}")]
    Decode { field: String, detail: String },
    /// A TCP-level connection or transport error.
    #[error("transport error for {url}: {detail}")]
    Transport { url: String, detail: String },
    /// The call did not finish inside its deadline.
    #[error("{port} timed out after {secs}s")]
    Timeout { port: &'static str, secs: u64 },
}

impl PortError {
    pub fn unavailable(port: &'static str, detail: impl Into<String>) -> Self {
        PortError::Unavailable { port, detail: detail.into() }
    }

    pub fn decode(field: impl Into<String>, detail: impl Into<String>) -> Self {
        PortError::Decode { field: field.into(), detail: detail.into() }
    }
}

/// Crate-level error for everything outside a running stage.
#[derive(Debug, Error)]
pub enum ExpeditionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("run {run_id} exceeded its {secs}s timeout")]
    RunTimedOut { run_id: String, secs: u64 },
    #[error(transparent)]
    Port(#[from] PortError),
}

impl ExpeditionError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ExpeditionError::Io { path: path.into(), source }
    }
}

pub type Result<T, E = ExpeditionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_error_display_carries_context() {
        let e = PortError::Http { status: 503, url: "https://api.example/v1".into() };
        assert_eq!(e.to_string(), "HTTP 503 from https://api.example/v1");
        let e = PortError::unavailable("embedding", "no key");
        assert_eq!(e.to_string(), "embedding unavailable: no key");
    }

    #[test]
    fn test_port_error_converts_into_crate_error() {
        let e: ExpeditionError = PortError::Timeout { port: "index", secs: 5 }.into();
        assert!(e.to_string().contains("timed out after 5s"));
    }

    #[test]
    fn test_run_timeout_display() {
        let e = ExpeditionError::RunTimedOut { run_id: "r1".into(), secs: 120 };
        assert_eq!(e.to_string(), "run r1 exceeded its 120s timeout");
    }
}
