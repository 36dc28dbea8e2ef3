//! Statutory filings.
//!
//! Once a run has been computed, the employer owes the tax authority two
//! monthly returns: the skills development levy (SDL) and the PAYE
//! income tax withheld.  [`generate_filings`] derives both from the
//! persisted run, and [`FilingStore`] keeps at most one base batch per
//! tenant and period.  Corrections go through an amendment, never a
//! second base batch.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::money::round2;
use crate::period::PayrollPeriod;
use crate::resolver::LoadedRules;
use crate::runs::PayrollRun;
use crate::statutory::filing_penalty;

pub const FILING_STATUS_READY: &str = "ready";
pub const REMINDER_STATUS_OPEN: &str = "open";
pub const FILING_SOURCE_AUTO: &str = "auto_generated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilingType {
    #[serde(rename = "SDL")]
    Sdl,
    #[serde(rename = "PAYE")]
    Paye,
}

impl FilingType {
    pub fn as_str(self) -> &'static str {
        match self {
            FilingType::Sdl => "SDL",
            FilingType::Paye => "PAYE",
        }
    }
}

/// Where a filing's figures came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingMetadata {
    pub source: String,
    pub payroll_run_id: Uuid,
    pub rule_set_id: Option<String>,
    pub rule_version: String,
    pub nssf_employee_total: Decimal,
    pub paye_total: Decimal,
    pub late_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filing {
    pub id: Uuid,
    pub tenant_id: String,
    pub period: PayrollPeriod,
    pub filing_type: FilingType,
    pub due_date: NaiveDate,
    pub status: String,
    pub amount_due: Decimal,
    pub penalty_amount: Decimal,
    pub interest_amount: Decimal,
    pub metadata: FilingMetadata,
}

/// An open compliance task created alongside each filing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingReminder {
    pub reminder_type: String,
    pub due_date: NaiveDate,
    pub status: String,
    /// `YYYY-MM` of the payroll period.
    pub related_period: String,
}

/// Filings and reminders written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingBatch {
    pub filings: Vec<Filing>,
    pub reminders: Vec<FilingReminder>,
}

/// Whole days past `due_date`; zero when on time.
pub fn late_days(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - due_date).num_days().max(0)
}

/// Build the SDL and PAYE returns for `run`.  `rules` should be the rule
/// set in force on the period's filing due date.
pub fn generate_filings(run: &PayrollRun, rules: &LoadedRules, today: NaiveDate) -> FilingBatch {
    let due_date = run.period.filing_due_date();
    let late_days = late_days(due_date, today);
    let statutory = &run.result.statutory;
    let paye_total = round2(statutory.paye_total);

    let metadata = FilingMetadata {
        source: FILING_SOURCE_AUTO.to_string(),
        payroll_run_id: run.id,
        rule_set_id: rules.rule_set_id.clone(),
        rule_version: rules.version.clone(),
        nssf_employee_total: round2(statutory.nssf_total),
        paye_total,
        late_days,
    };

    let base = [(FilingType::Sdl, round2(statutory.sdl)), (FilingType::Paye, paye_total)];

    let filings = base
        .iter()
        .map(|&(filing_type, amount_due)| Filing {
            id: Uuid::new_v4(),
            tenant_id: run.tenant_id.clone(),
            period: run.period,
            filing_type,
            due_date,
            status: FILING_STATUS_READY.to_string(),
            amount_due,
            penalty_amount: filing_penalty(amount_due, late_days, &rules.config),
            interest_amount: Decimal::ZERO,
            metadata: metadata.clone(),
        })
        .collect();

    let reminders = base
        .iter()
        .map(|(filing_type, _)| FilingReminder {
            reminder_type: format!("{}_RETURN_DUE", filing_type.as_str()),
            due_date,
            status: REMINDER_STATUS_OPEN.to_string(),
            related_period: run.period.label(),
        })
        .collect();

    FilingBatch { filings, reminders }
}

#[async_trait]
pub trait FilingStore: Send + Sync + 'static {
    /// Persist the base batch for a tenant's period atomically and
    /// return it as stored.  Fails with `StoreError::Duplicate` if that
    /// period already has one.
    async fn insert_base_batch(
        &self,
        tenant_id: &str,
        period: PayrollPeriod,
        batch: FilingBatch,
    ) -> Result<FilingBatch, StoreError>;

    /// The base batch for a tenant's period, if one was generated.
    async fn base_batch(&self, tenant_id: &str, period: PayrollPeriod) -> Result<Option<FilingBatch>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryFilingStore {
    batches: Mutex<HashMap<(String, PayrollPeriod), FilingBatch>>,
}

impl InMemoryFilingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FilingStore for InMemoryFilingStore {
    async fn insert_base_batch(
        &self,
        tenant_id: &str,
        period: PayrollPeriod,
        batch: FilingBatch,
    ) -> Result<FilingBatch, StoreError> {
        let mut batches = self.batches.lock().await;
        let key = (tenant_id.to_string(), period);
        if batches.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "base filings for {tenant_id} {}",
                period.label()
            )));
        }
        batches.insert(key, batch.clone());
        Ok(batch)
    }

    async fn base_batch(&self, tenant_id: &str, period: PayrollPeriod) -> Result<Option<FilingBatch>, StoreError> {
        let batches = self.batches.lock().await;
        Ok(batches.get(&(tenant_id.to_string(), period)).cloned())
    }
}
