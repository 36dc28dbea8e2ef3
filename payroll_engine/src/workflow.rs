//! Payroll run lifecycle.
//!
//! ```text
//! Draft ──▶ Validated ──▶ Approved ──▶ Locked ──▶ Paid (terminal)
//!   ▲           │  ▲          │
//!   └───────────┘  └──────────┘   (rollback)
//! ```
//!
//! The workflow only validates a requested transition.  Callers persist
//! the new status after the check passes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayrollRunStatus {
    Draft,
    Validated,
    Approved,
    Locked,
    Paid,
}

impl PayrollRunStatus {
    pub const ALL: [PayrollRunStatus; 5] = [
        PayrollRunStatus::Draft,
        PayrollRunStatus::Validated,
        PayrollRunStatus::Approved,
        PayrollRunStatus::Locked,
        PayrollRunStatus::Paid,
    ];

    /// Statuses reachable in one step from `self`.
    pub fn allowed_targets(self) -> &'static [PayrollRunStatus] {
        use PayrollRunStatus::*;
        match self {
            Draft => &[Validated],
            Validated => &[Approved, Draft],
            Approved => &[Locked, Validated],
            Locked => &[Paid],
            Paid => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayrollRunStatus::Draft => "draft",
            PayrollRunStatus::Validated => "validated",
            PayrollRunStatus::Approved => "approved",
            PayrollRunStatus::Locked => "locked",
            PayrollRunStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PayrollRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayrollRunStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayrollRunStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownStatus(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid payroll status transition: {from} -> {to}")]
    InvalidTransition {
        from: PayrollRunStatus,
        to: PayrollRunStatus,
    },

    #[error("target_status must be one of draft, validated, approved, locked, paid (got {0:?})")]
    UnknownStatus(String),
}

pub fn can_transition(from: PayrollRunStatus, to: PayrollRunStatus) -> bool {
    from.allowed_targets().contains(&to)
}

/// Reject any transition not in the allowed table.
pub fn assert_transition(from: PayrollRunStatus, to: PayrollRunStatus) -> Result<(), WorkflowError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition { from, to })
    }
}
