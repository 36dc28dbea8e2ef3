//! Statutory deductions and levies.
//!
//! Income tax (PAYE), the employee pension contribution (NSSF), the
//! employer payroll levy (SDL) and the late-filing penalty.  Every
//! function takes the [`RuleConfig`] explicitly and is free of side
//! effects, so the engine can call them from any thread.

use crate::models::{TaxProfile, TaxResidency};
use crate::money::{non_negative, round2};
use crate::rules::{ProgressiveBand, RuleConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The income-tax rule that applies to an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeTaxRule {
    NonFullTimeDirector,
    NonResident,
    SecondaryEmployment,
    Progressive,
}

impl IncomeTaxRule {
    /// Select the rule for a profile.  The checks run in a fixed order
    /// and the first one that applies wins: a non-full-time director is
    /// taxed as a director even when also non-resident.
    pub fn for_profile(profile: &TaxProfile) -> Self {
        if profile.is_non_full_time_director {
            IncomeTaxRule::NonFullTimeDirector
        } else if profile.tax_residency == TaxResidency::NonResident {
            IncomeTaxRule::NonResident
        } else if !profile.is_primary_employment {
            IncomeTaxRule::SecondaryEmployment
        } else {
            IncomeTaxRule::Progressive
        }
    }

    /// The flat rate for this rule, or `None` for the band schedule.
    pub fn flat_rate(self, rules: &RuleConfig) -> Option<Decimal> {
        match self {
            IncomeTaxRule::NonFullTimeDirector => Some(rules.director_non_full_time_rate),
            IncomeTaxRule::NonResident => Some(rules.non_resident_paye_rate),
            IncomeTaxRule::SecondaryEmployment => Some(rules.secondary_employment_rate),
            IncomeTaxRule::Progressive => None,
        }
    }
}

/// Income tax on `taxable_pay` for the given profile, rounded to cents.
pub fn income_tax(taxable_pay: Decimal, profile: &TaxProfile, rules: &RuleConfig) -> Decimal {
    let taxable_pay = non_negative(taxable_pay);
    let tax = match IncomeTaxRule::for_profile(profile).flat_rate(rules) {
        Some(rate) => taxable_pay * rate,
        None => progressive_tax(taxable_pay, &rules.paye_bands_resident_primary),
    };
    round2(tax)
}

/// Unrounded tax from a band schedule.  Each band taxes the slice of
/// pay between its lower bound and the lesser of its upper bound and
/// the pay; bands starting at or above the pay contribute nothing.
pub fn progressive_tax(taxable_amount: Decimal, bands: &[ProgressiveBand]) -> Decimal {
    bands
        .iter()
        .filter(|band| taxable_amount > band.from)
        .map(|band| {
            let upper = band.to.unwrap_or(taxable_amount);
            let slice = non_negative(taxable_amount.min(upper) - band.from);
            slice * band.rate
        })
        .sum()
}

/// Employee pension contribution.  Only basic pay is pensionable.
pub fn pension_contribution(pensionable_pay: Decimal, rules: &RuleConfig) -> Decimal {
    round2(non_negative(pensionable_pay) * rules.nssf_employee_rate)
}

/// Payroll levy over a whole batch.  Zero unless the batch headcount
/// reaches the configured threshold.
pub fn payroll_levy(total_gross_emoluments: Decimal, employee_count: usize, rules: &RuleConfig) -> Decimal {
    if Decimal::from(employee_count) >= rules.sdl_employee_threshold {
        round2(total_gross_emoluments * rules.sdl_rate)
    } else {
        Decimal::ZERO
    }
}

/// Penalty accrued on a filing that is `late_days` past due.
pub fn filing_penalty(amount_due: Decimal, late_days: i64, rules: &RuleConfig) -> Decimal {
    let late_days = Decimal::from(late_days.max(0));
    round2(amount_due * rules.filing_penalty_daily_rate * late_days)
}
