//! Structured-output parsing for model responses.
//!
//! Models wrap JSON in prose or code fences; everything here works on the
//! first balanced `{...}` block and leaves the fallback policy to the caller.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::PortError;

/// First balanced `{...}` block in `text`, honouring JSON string escapes.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deserialize the first JSON object in `text`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, PortError> {
    let block = extract_json_block(text).ok_or_else(|| PortError::decode("response", "no JSON object found"))?;
    serde_json::from_str(block).map_err(|e| PortError::decode("response", e.to_string()))
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Confidence may arrive as a number or a numeric string.
fn lenient_f64<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().trim_end_matches('%').parse().ok(),
        None => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionSuggestion {
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub priority: Option<serde_json::Value>,
}

/// What the explain prompt asks the model to return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosisResponse {
    #[serde(default)]
    pub root_cause: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionSuggestion>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub director_summary: String,
    #[serde(default)]
    pub marketer_summary: String,
    #[serde(default)]
    pub technical_details: String,
}

/// What the critic prompt asks the model to return.
#[derive(Debug, Clone, Deserialize)]
pub struct CriticResponse {
    pub is_valid: bool,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub hallucination_risk: Option<f64>,
    #[serde(default)]
    pub data_grounded: Option<bool>,
    #[serde(default)]
    pub evidence_verified: Option<bool>,
    #[serde(default)]
    pub issues: Vec<String>,
}
