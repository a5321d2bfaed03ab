//! # Stage: Saturation Guardrail
//!
//! ## Responsibility
//! Veto budget and bid increases on channels the media-mix model says are
//! already past their efficient spend level.
//!
//! ## Guarantees
//! - Temporally bounded: the signal is read "as of" the run's reference date
//! - Fail-open: a missing or failing strategy feed never blocks a proposal
//! - Pure decision: [`SaturationGuardrail::assess`] is a function of the
//!   signal and the action key only
//!
//! ## NOT Responsible For
//! - Rewriting the action (the engine substitutes manual review)
//! - Non-increase actions

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::ActionKey;
use crate::ports::sources::{SaturationSignal, SpendRecommendation, StrategySource};

#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    Allow,
    /// Swap the action for manual review; `reason` is the annotation.
    Replace { reason: String },
}

pub struct SaturationGuardrail {
    source: Arc<dyn StrategySource>,
    efficiency_floor: f64,
}

impl SaturationGuardrail {
    pub fn new(source: Arc<dyn StrategySource>, efficiency_floor: f64) -> Self {
        Self { source, efficiency_floor }
    }

    /// Fetch the signal; feed errors are logged and read as "no signal".
    pub async fn signal(&self, channel: &str, as_of: NaiveDate) -> Option<SaturationSignal> {
        match self.source.saturation(channel, as_of).await {
            Ok(signal) => {
                if signal.is_none() {
                    debug!(channel, %as_of, "no saturation signal; guardrail skipped");
                }
                signal
            }
            Err(e) => {
                warn!(error = %e, channel, %as_of, "saturation signal unavailable; guardrail skipped");
                None
            }
        }
    }

    pub fn assess(&self, signal: Option<&SaturationSignal>, key: ActionKey) -> GuardrailVerdict {
        if !key.is_increase() {
            return GuardrailVerdict::Allow;
        }
        let Some(s) = signal else {
            return GuardrailVerdict::Allow;
        };
        if s.marginal_roas < self.efficiency_floor {
            return GuardrailVerdict::Replace {
                reason: format!(
                    "{key} blocked: marginal ROAS {:.2} below floor {:.2} as of {}",
                    s.marginal_roas, self.efficiency_floor, s.date
                ),
            };
        }
        if matches!(s.recommendation, SpendRecommendation::Maintain | SpendRecommendation::Reduce) {
            return GuardrailVerdict::Replace {
                reason: format!(
                    "{key} blocked: strategy recommends '{}' (spend {:.0} vs saturation {:.0}/day) as of {}",
                    s.recommendation, s.current_daily_spend, s.saturation_point_daily, s.date
                ),
            };
        }
        GuardrailVerdict::Allow
    }
}
