//! Data models for the Payroll Engine.
//!
//! The `models` module defines the serialisable input and output
//! structures of the computation engine.  These types form the stable
//! contract that run creation and filing generation depend on: callers
//! build a list of [`EmployeePayrollInput`] values and receive a
//! [`PayrollComputationResult`] back.  Results are never mutated after
//! they are produced.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Working days assumed when an input does not say otherwise.
pub const DEFAULT_WORKING_DAYS: Decimal = dec!(22);

/// Tax residency of an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxResidency {
    #[default]
    Resident,
    NonResident,
}

/// The facts about an employee that select an income-tax rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxProfile {
    pub tax_residency: TaxResidency,
    /// Whether this employer is the employee's primary employment.
    /// Secondary employment is taxed at a flat rate.
    pub is_primary_employment: bool,
    /// Non-full-time directors are taxed at a flat rate regardless of
    /// residency.
    pub is_non_full_time_director: bool,
}

impl Default for TaxProfile {
    fn default() -> Self {
        Self {
            tax_residency: TaxResidency::Resident,
            is_primary_employment: true,
            is_non_full_time_director: false,
        }
    }
}

/// Employer-provided housing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HousingBenefit {
    pub market_rent: Decimal,
    pub employer_deductible_expense: Decimal,
    pub employee_contribution: Decimal,
}

/// A company vehicle available for private use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleBenefit {
    pub engine_cc: Decimal,
    pub vehicle_age_years: Decimal,
    /// Only vehicles the employer claims a deduction for are taxable.
    #[serde(default = "default_true")]
    pub employer_claims_deduction: bool,
}

fn default_true() -> bool {
    true
}

/// A loan from the employer at a below-market rate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanBenefit {
    pub principal_outstanding: Decimal,
    /// Annual rate the employee actually pays, e.g. `0.05`.
    pub employee_interest_rate: Decimal,
}

/// Benefits in kind for the period.  Each kind is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenefitsInKind {
    pub housing: Option<HousingBenefit>,
    pub vehicle: Option<VehicleBenefit>,
    pub loan: Option<LoanBenefit>,
    /// Taxable value of any other benefit, already quantified.
    pub other_taxable_value: Option<Decimal>,
}

/// Everything the engine needs to pay one employee for one period.
///
/// All amounts are optional on the wire and default to zero; negative
/// values are clamped by the engine rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeePayrollInput {
    pub employee_id: String,
    pub basic_salary: Decimal,
    #[serde(default)]
    pub allowance_total: Option<Decimal>,
    #[serde(default)]
    pub overtime_pay: Option<Decimal>,
    #[serde(default)]
    pub arrears_pay: Option<Decimal>,
    #[serde(default)]
    pub bonus_pay: Option<Decimal>,
    #[serde(default)]
    pub unpaid_leave_days: Option<Decimal>,
    /// Defaults to [`DEFAULT_WORKING_DAYS`] when absent.
    #[serde(default)]
    pub working_days_in_period: Option<Decimal>,
    #[serde(default)]
    pub loan_repayment: Option<Decimal>,
    #[serde(default)]
    pub manual_deduction_total: Option<Decimal>,
    #[serde(default)]
    pub tax_profile: TaxProfile,
    #[serde(default)]
    pub bik: BenefitsInKind,
}

impl EmployeePayrollInput {
    /// An employee with only a basic salary; every other input takes its
    /// default.
    pub fn new(employee_id: impl Into<String>, basic_salary: Decimal) -> Self {
        Self {
            employee_id: employee_id.into(),
            basic_salary,
            allowance_total: None,
            overtime_pay: None,
            arrears_pay: None,
            bonus_pay: None,
            unpaid_leave_days: None,
            working_days_in_period: None,
            loan_repayment: None,
            manual_deduction_total: None,
            tax_profile: TaxProfile::default(),
            bik: BenefitsInKind::default(),
        }
    }
}

/// The computed pay of a single employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollItemResult {
    pub employee_id: String,
    /// Share of the period actually paid, in `[0, 1]`.
    pub proration_factor: Decimal,
    pub prorated_basic_pay: Decimal,
    pub allowance_pay: Decimal,
    pub overtime_pay: Decimal,
    pub arrears_pay: Decimal,
    pub bonus_pay: Decimal,
    pub bik_housing_taxable: Decimal,
    pub bik_vehicle_taxable: Decimal,
    pub bik_loan_taxable: Decimal,
    pub bik_other_taxable: Decimal,
    pub gross_pay: Decimal,
    /// Gross pay plus every benefit-in-kind contribution.
    pub taxable_pay: Decimal,
    /// Income tax plus pension.
    pub statutory_deductions: Decimal,
    pub paye_deduction: Decimal,
    pub nssf_deduction: Decimal,
    pub loan_deductions: Decimal,
    pub manual_deductions: Decimal,
    pub total_deductions: Decimal,
    /// Never negative; see `warnings` when it was floored.
    pub net_pay: Decimal,
    pub warnings: Vec<String>,
}

/// Batch-level statutory figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatutoryTotals {
    /// Payroll levy over the whole batch.
    pub sdl: Decimal,
    pub paye_total: Decimal,
    pub nssf_total: Decimal,
}

/// The aggregate result of one computation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollComputationResult {
    pub gross_total: Decimal,
    pub deduction_total: Decimal,
    pub net_total: Decimal,
    pub statutory: StatutoryTotals,
    /// One line per employee that raised any warning.
    pub warnings: Vec<String>,
    /// Per-employee results in input order.
    pub items: Vec<PayrollItemResult>,
}

impl PayrollComputationResult {
    /// Whether any employee raised a warning that should be reviewed
    /// before the run is approved.
    pub fn needs_review(&self) -> bool {
        !self.warnings.is_empty()
    }
}
