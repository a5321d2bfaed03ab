//! Shared doubles for the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use expedition::error::PortError;
use expedition::ports::TextGenerator;

/// Answers by prompt marker, first matching rule wins. Counts every call,
/// including failing ones.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Vec<(String, String)>,
    fail_all: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((marker.into(), response.into()));
        self
    }

    /// Every call fails, as if the backend were down.
    pub fn failing() -> Self {
        Self { fail_all: true, ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts seen so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.prompts.lock() {
            seen.push(user_prompt.to_string());
        }
        if self.fail_all {
            return Err(PortError::unavailable("text_generation", "scripted failure"));
        }
        let haystack = format!("{system_prompt}\n{user_prompt}");
        self.rules
            .iter()
            .find(|(marker, _)| haystack.contains(marker.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| PortError::unavailable("text_generation", "no scripted response"))
    }
}
