//! Executor interface exposed to platform connectors, plus a dry-run
//! implementation that validates and records actions without touching any
//! platform.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::actions::ActionProposal;
use crate::model::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Rejected,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success  => write!(f, "success"),
            ExecutionStatus::Rejected => write!(f, "rejected"),
            ExecutionStatus::Failed   => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub execution_id: Option<String>,
    pub message: String,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, action: &ActionProposal) -> ExecutionResult;

    /// `Err(reason)` when the action cannot be executed as given.
    fn validate(&self, action: &ActionProposal) -> Result<(), String>;

    fn preview(&self, action: &ActionProposal) -> String;
}

// ---------------------------------------------------------------------------
// DryRunExecutor
// ---------------------------------------------------------------------------

/// Records what would have been executed.
#[derive(Default)]
pub struct DryRunExecutor {
    executed: Mutex<HashMap<String, ActionProposal>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Revert a previously executed action by issuing its inverse operation.
    pub fn rollback(&self, execution_id: &str) -> ExecutionResult {
        let original = match self.executed.lock() {
            Ok(mut m) => m.remove(execution_id),
            Err(_) => None,
        };
        let Some(action) = original else {
            return ExecutionResult {
                status: ExecutionStatus::Failed,
                execution_id: None,
                message: format!("unknown execution id {execution_id}"),
            };
        };
        if !action.action_type.is_reversible() {
            return ExecutionResult {
                status: ExecutionStatus::Rejected,
                execution_id: Some(execution_id.to_string()),
                message: format!("{} actions cannot be rolled back", action.action_type),
            };
        }
        let inverse = inverse_operation(&action.operation);
        info!(execution_id, operation = %action.operation, inverse = %inverse, "dry-run rollback");
        ExecutionResult {
            status: ExecutionStatus::Success,
            execution_id: Some(execution_id.to_string()),
            message: format!("[dry-run] would {inverse} on {}/{}", action.platform, action.resource_id),
        }
    }
}

fn inverse_operation(operation: &str) -> String {
    if operation.contains("increase") {
        operation.replace("increase", "decrease")
    } else if operation.contains("decrease") {
        operation.replace("decrease", "increase")
    } else if operation.contains("pause") {
        operation.replace("pause", "enable")
    } else if operation.contains("enable") {
        operation.replace("enable", "pause")
    } else {
        format!("revert_{operation}")
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn execute(&self, action: &ActionProposal) -> ExecutionResult {
        if let Err(reason) = self.validate(action) {
            return ExecutionResult { status: ExecutionStatus::Rejected, execution_id: None, message: reason };
        }
        let execution_id = format!("dry_{}", Uuid::new_v4().simple());
        info!(execution_id = %execution_id, action_id = %action.action_id, operation = %action.operation, "dry-run execute");
        if let Ok(mut m) = self.executed.lock() {
            m.insert(execution_id.clone(), action.clone());
        }
        ExecutionResult {
            status: ExecutionStatus::Success,
            execution_id: Some(execution_id),
            message: format!("[dry-run] {}", self.preview(action)),
        }
    }

    fn validate(&self, action: &ActionProposal) -> Result<(), String> {
        let has = |name: &str| action.parameters.contains_key(name);
        match action.action_type {
            ActionType::BudgetChange | ActionType::BidAdjustment if !has("adjustment_pct") => {
                Err(format!("{} requires adjustment_pct", action.action_type))
            }
            ActionType::Notification if !has("team") => Err("notification requires team".to_string()),
            _ if action.resource_id.is_empty() => Err("resource_id is empty".to_string()),
            _ => Ok(()),
        }
    }

    fn preview(&self, action: &ActionProposal) -> String {
        let detail = match action.parameters.get("adjustment_pct").and_then(|v| v.as_f64()) {
            Some(pct) => format!(" by {pct:.0}%"),
            None => match action.parameters.get("team").and_then(|v| v.as_str()) {
                Some(team) => format!(" (team: {team})"),
                None => String::new(),
            },
        };
        let approval = if action.requires_approval { ", needs approval" } else { "" };
        format!(
            "{} on {}/{}{} [{} risk{}]",
            action.operation, action.platform, action.resource_id, detail, action.risk_level, approval
        )
    }
}
