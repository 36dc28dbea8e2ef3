//! Persisted payroll runs.
//!
//! A [`PayrollRun`] snapshots one computation together with the rule set
//! it was computed under, so that later filings and audits see exactly
//! what was paid.  Storage sits behind [`PayrollRunStore`]; the
//! in-memory implementation backs the server and the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::PayrollComputationResult;
use crate::period::PayrollPeriod;
use crate::resolver::LoadedRules;
use crate::workflow::{assert_transition, PayrollRunStatus, WorkflowError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollRun {
    pub id: Uuid,
    pub tenant_id: String,
    pub period: PayrollPeriod,
    pub run_label: Option<String>,
    pub status: PayrollRunStatus,
    pub rule_set_id: Option<String>,
    pub rule_version: String,
    pub result: PayrollComputationResult,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
}

impl PayrollRun {
    /// A new run in `draft`.
    pub fn draft(
        tenant_id: impl Into<String>,
        period: PayrollPeriod,
        run_label: Option<String>,
        rules: &LoadedRules,
        result: PayrollComputationResult,
        actor: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            period,
            run_label,
            status: PayrollRunStatus::Draft,
            rule_set_id: rules.rule_set_id.clone(),
            rule_version: rules.version.clone(),
            result,
            created_by: actor.into(),
            created_at: now,
            updated_at: now,
            locked_at: None,
            locked_by: None,
        }
    }

    /// Move to `to` if the workflow allows it.  Locking stamps who
    /// locked the run and when.  On error the run is left untouched.
    pub fn transition(&mut self, to: PayrollRunStatus, actor: &str, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        assert_transition(self.status, to)?;
        self.status = to;
        self.updated_at = now;
        if to == PayrollRunStatus::Locked {
            self.locked_at = Some(now);
            self.locked_by = Some(actor.to_string());
        }
        Ok(())
    }
}

#[async_trait]
pub trait PayrollRunStore: Send + Sync + 'static {
    async fn insert(&self, run: PayrollRun) -> Result<(), StoreError>;

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<PayrollRun>, StoreError>;

    /// The tenant's most recently created run.
    async fn latest(&self, tenant_id: &str) -> Result<Option<PayrollRun>, StoreError>;

    /// Overwrite a run after a status change.  Fails with
    /// `StoreError::ConcurrentConflict` if the stored status is no longer
    /// `expected`.
    async fn save_transition(&self, run: &PayrollRun, expected: PayrollRunStatus) -> Result<(), StoreError>;
}

/// Runs kept in creation order.
#[derive(Debug, Default)]
pub struct InMemoryPayrollRunStore {
    runs: RwLock<Vec<PayrollRun>>,
}

impl InMemoryPayrollRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayrollRunStore for InMemoryPayrollRunStore {
    async fn insert(&self, run: PayrollRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.iter().any(|existing| existing.id == run.id) {
            return Err(StoreError::Duplicate(format!("payroll run {}", run.id)));
        }
        runs.push(run);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Option<PayrollRun>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs
            .iter()
            .find(|run| run.id == id && run.tenant_id == tenant_id)
            .cloned())
    }

    async fn latest(&self, tenant_id: &str) -> Result<Option<PayrollRun>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.iter().rev().find(|run| run.tenant_id == tenant_id).cloned())
    }

    async fn save_transition(&self, run: &PayrollRun, expected: PayrollRunStatus) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs
            .iter_mut()
            .find(|stored| stored.id == run.id && stored.tenant_id == run.tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("Payroll run {} not found", run.id)))?;
        if stored.status != expected {
            return Err(StoreError::ConcurrentConflict(format!("payroll run {}", run.id)));
        }
        *stored = run.clone();
        Ok(())
    }
}
