//! Payroll computation engine.
//!
//! The `engine` module turns a batch of [`EmployeePayrollInput`] values
//! into a [`PayrollComputationResult`].  It uses the [`rayon`] crate to
//! spread per-employee calculations across CPU cores; results keep the
//! input order.  Benefit valuation and statutory deductions are
//! delegated to the [`crate::benefits`] and [`crate::statutory`]
//! modules, and the payroll levy is computed once over the whole batch
//! after every employee has been processed.
//!
//! The engine never fails on odd numeric input.  Negative amounts are
//! clamped to zero and amounts above [`MAX_AMOUNT`] are capped, so the
//! arithmetic cannot overflow.  Conditions a human should look at (leave
//! exceeding working days, capped amounts, net pay floored at zero, zero
//! gross pay) are reported as warnings on the result.

use crate::benefits::{housing_taxable_value, loan_taxable_value, vehicle_taxable_value};
use crate::models::{
    EmployeePayrollInput, PayrollComputationResult, PayrollItemResult, StatutoryTotals, DEFAULT_WORKING_DAYS,
};
use crate::money::{capped_amount, capped_or_zero, clamp, non_negative, round2, round6, MAX_AMOUNT};
use crate::rules::RuleConfig;
use crate::statutory::{income_tax, payroll_levy, pension_contribution};
use rayon::prelude::*;
use rust_decimal::Decimal;

pub const WARN_LEAVE_CAPPED: &str = "Unpaid leave days exceeded working days and were capped for proration.";
pub const WARN_NET_PAY_FLOORED: &str = "Net pay was negative before floor-to-zero adjustment.";
pub const WARN_ZERO_GROSS: &str = "Gross pay is zero. Check contract, earnings, leave and attendance inputs.";
pub const WARN_AMOUNT_CAPPED: &str = "One or more amounts exceeded the supported maximum and were capped.";

/// Compute pay for every employee in the batch under `rules`.
pub fn compute_payroll(employees: &[EmployeePayrollInput], rules: &RuleConfig) -> PayrollComputationResult {
    let items: Vec<PayrollItemResult> = employees
        .par_iter()
        .map(|employee| compute_item(employee, rules))
        .collect();

    let warnings = items
        .iter()
        .filter(|item| !item.warnings.is_empty())
        .map(|item| format!("Employee {}: {}", item.employee_id, item.warnings.join(" ")))
        .collect();

    let total = |field: fn(&PayrollItemResult) -> Decimal| round2(items.iter().map(field).sum());
    let gross_total = total(|item| item.gross_pay);
    let deduction_total = total(|item| item.total_deductions);
    let net_total = total(|item| item.net_pay);
    let paye_total = total(|item| item.paye_deduction);
    let nssf_total = total(|item| item.nssf_deduction);

    let sdl = payroll_levy(gross_total, items.len(), rules);

    PayrollComputationResult {
        gross_total,
        deduction_total,
        net_total,
        statutory: StatutoryTotals {
            sdl,
            paye_total,
            nssf_total,
        },
        warnings,
        items,
    }
}

/// Share of the period paid after unpaid leave, rounded to six places.
/// Returns the factor and whether the leave had to be capped.
pub fn proration_factor(working_days: Decimal, unpaid_leave_days: Decimal) -> (Decimal, bool) {
    let working_days = non_negative(working_days);
    let unpaid_leave_days = non_negative(unpaid_leave_days);
    let capped = unpaid_leave_days > working_days;

    if working_days.is_zero() {
        return (Decimal::ONE, capped);
    }
    let ratio = (working_days - unpaid_leave_days) / working_days;
    (round6(clamp(ratio, Decimal::ZERO, Decimal::ONE)), capped)
}

fn amount(value: Option<Decimal>) -> Decimal {
    round2(capped_or_zero(value))
}

/// Whether any monetary input is above [`MAX_AMOUNT`] and will be capped.
fn has_oversized_amount(employee: &EmployeePayrollInput) -> bool {
    let bik = &employee.bik;
    let optional = [
        employee.allowance_total,
        employee.overtime_pay,
        employee.arrears_pay,
        employee.bonus_pay,
        employee.loan_repayment,
        employee.manual_deduction_total,
        bik.other_taxable_value,
    ];
    let housing = bik
        .housing
        .iter()
        .flat_map(|h| [h.market_rent, h.employer_deductible_expense, h.employee_contribution]);
    let loan = bik.loan.iter().map(|l| l.principal_outstanding);

    std::iter::once(employee.basic_salary)
        .chain(optional.into_iter().flatten())
        .chain(housing)
        .chain(loan)
        .any(|value| value > MAX_AMOUNT)
}

/// Compute a single employee's pay.
pub fn compute_item(employee: &EmployeePayrollInput, rules: &RuleConfig) -> PayrollItemResult {
    let mut warnings = Vec::new();

    let (proration_factor, leave_capped) = proration_factor(
        employee.working_days_in_period.unwrap_or(DEFAULT_WORKING_DAYS),
        employee.unpaid_leave_days.unwrap_or(Decimal::ZERO),
    );
    if leave_capped {
        warnings.push(WARN_LEAVE_CAPPED.to_string());
    }
    if has_oversized_amount(employee) {
        warnings.push(WARN_AMOUNT_CAPPED.to_string());
    }

    let prorated_basic_pay = round2(capped_amount(employee.basic_salary) * proration_factor);
    let allowance_pay = amount(employee.allowance_total);
    let overtime_pay = amount(employee.overtime_pay);
    let arrears_pay = amount(employee.arrears_pay);
    let bonus_pay = amount(employee.bonus_pay);
    let gross_pay = round2(prorated_basic_pay + allowance_pay + overtime_pay + arrears_pay + bonus_pay);

    let bik = &employee.bik;
    let bik_housing_taxable = bik
        .housing
        .as_ref()
        .map_or(Decimal::ZERO, |housing| housing_taxable_value(housing, gross_pay, rules));
    let bik_vehicle_taxable = bik
        .vehicle
        .as_ref()
        .map_or(Decimal::ZERO, |vehicle| vehicle_taxable_value(vehicle, rules));
    let bik_loan_taxable = bik
        .loan
        .as_ref()
        .map_or(Decimal::ZERO, |loan| loan_taxable_value(loan, rules));
    let bik_other_taxable = amount(bik.other_taxable_value);

    let taxable_pay =
        round2(gross_pay + bik_housing_taxable + bik_vehicle_taxable + bik_loan_taxable + bik_other_taxable);

    let paye_deduction = income_tax(taxable_pay, &employee.tax_profile, rules);
    let nssf_deduction = pension_contribution(prorated_basic_pay, rules);
    let statutory_deductions = round2(paye_deduction + nssf_deduction);
    let loan_deductions = amount(employee.loan_repayment);
    let manual_deductions = amount(employee.manual_deduction_total);
    let total_deductions = round2(statutory_deductions + loan_deductions + manual_deductions);

    // The shortfall is not carried forward.
    let raw_net_pay = round2(gross_pay - total_deductions);
    let net_pay = non_negative(raw_net_pay);
    if raw_net_pay < Decimal::ZERO {
        warnings.push(WARN_NET_PAY_FLOORED.to_string());
    }
    if gross_pay.is_zero() {
        warnings.push(WARN_ZERO_GROSS.to_string());
    }

    if !warnings.is_empty() {
        tracing::debug!(employee_id = %employee.employee_id, ?warnings, "payroll item raised warnings");
    }

    PayrollItemResult {
        employee_id: employee.employee_id.clone(),
        proration_factor,
        prorated_basic_pay,
        allowance_pay,
        overtime_pay,
        arrears_pay,
        bonus_pay,
        bik_housing_taxable,
        bik_vehicle_taxable,
        bik_loan_taxable,
        bik_other_taxable,
        gross_pay,
        taxable_pay,
        statutory_deductions,
        paye_deduction,
        nssf_deduction,
        loan_deductions,
        manual_deductions,
        total_deductions,
        net_pay,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BenefitsInKind, HousingBenefit, LoanBenefit, TaxProfile, TaxResidency, VehicleBenefit};
    use rust_decimal_macros::dec;

    #[test]
    fn test_proration_and_negative_net_floor() {
        let mut employee = EmployeePayrollInput::new("emp-1", dec!(2200000));
        employee.allowance_total = Some(dec!(200000));
        employee.unpaid_leave_days = Some(dec!(2));
        employee.working_days_in_period = Some(dec!(22));
        employee.manual_deduction_total = Some(dec!(2000000));

        let result = compute_payroll(&[employee], &RuleConfig::default());
        let item = &result.items[0];
        assert_eq!(item.proration_factor, dec!(0.909091));
        assert_eq!(item.prorated_basic_pay, dec!(2000000.2));
        assert_eq!(item.gross_pay, dec!(2200000.2));
        assert_eq!(item.net_pay, Decimal::ZERO);
        assert!(item.warnings.contains(&WARN_NET_PAY_FLOORED.to_string()));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("Employee emp-1: "));
        assert!(result.needs_review());
    }

    #[test]
    fn test_profiles_drive_tax_and_pension() {
        let mut first = EmployeePayrollInput::new("emp-1", dec!(1000000));
        first.allowance_total = Some(dec!(100000));
        first.overtime_pay = Some(dec!(50000));
        first.arrears_pay = Some(dec!(20000));
        first.bonus_pay = Some(dec!(80000));
        first.loan_repayment = Some(dec!(25000));
        first.manual_deduction_total = Some(dec!(10000));
        first.tax_profile = TaxProfile {
            tax_residency: TaxResidency::NonResident,
            is_primary_employment: true,
            is_non_full_time_director: false,
        };

        let mut second = EmployeePayrollInput::new("emp-2", dec!(900000));
        second.allowance_total = Some(dec!(60000));
        second.tax_profile = TaxProfile {
            tax_residency: TaxResidency::Resident,
            is_primary_employment: false,
            is_non_full_time_director: false,
        };

        let result = compute_payroll(&[first, second], &RuleConfig::default());
        assert_eq!(result.gross_total, dec!(2210000));
        assert_eq!(result.deduction_total, dec!(700500));
        assert_eq!(result.net_total, dec!(1509500));
        assert_eq!(result.statutory.sdl, Decimal::ZERO);
        assert_eq!(result.statutory.paye_total, dec!(475500));
        assert_eq!(result.statutory.nssf_total, dec!(190000));
        assert_eq!(result.items[0].employee_id, "emp-1");
        assert_eq!(result.items[1].employee_id, "emp-2");
        assert!(!result.needs_review());
    }

    #[test]
    fn test_levy_applies_once_threshold_is_met() {
        let employees: Vec<_> = (1..=10)
            .map(|i| EmployeePayrollInput::new(format!("emp-{i}"), dec!(1000000)))
            .collect();
        let result = compute_payroll(&employees, &RuleConfig::default());
        assert_eq!(result.gross_total, dec!(10000000));
        assert_eq!(result.statutory.sdl, dec!(350000));

        let result = compute_payroll(&employees[..9], &RuleConfig::default());
        assert_eq!(result.statutory.sdl, Decimal::ZERO);
    }

    #[test]
    fn test_proration_bounds() {
        assert_eq!(proration_factor(Decimal::ZERO, dec!(3)), (Decimal::ONE, true));
        assert_eq!(proration_factor(dec!(20), dec!(25)), (Decimal::ZERO, true));
        assert_eq!(proration_factor(dec!(-4), Decimal::ZERO), (Decimal::ONE, false));
        assert_eq!(proration_factor(dec!(20), dec!(-5)), (Decimal::ONE, false));
        assert_eq!(proration_factor(dec!(20), dec!(5)), (dec!(0.75), false));
    }

    #[test]
    fn test_leave_exceeding_working_days_warns_and_zeroes_basic() {
        let mut employee = EmployeePayrollInput::new("emp-1", dec!(1000000));
        employee.unpaid_leave_days = Some(dec!(30));
        let item = compute_item(&employee, &RuleConfig::default());
        assert_eq!(item.proration_factor, Decimal::ZERO);
        assert_eq!(item.gross_pay, Decimal::ZERO);
        assert_eq!(
            item.warnings,
            vec![WARN_LEAVE_CAPPED.to_string(), WARN_ZERO_GROSS.to_string()]
        );
    }

    #[test]
    fn test_negative_inputs_are_clamped() {
        let mut employee = EmployeePayrollInput::new("emp-1", dec!(-500));
        employee.bonus_pay = Some(dec!(-100));
        employee.manual_deduction_total = Some(dec!(-50));
        let item = compute_item(&employee, &RuleConfig::default());
        assert_eq!(item.gross_pay, Decimal::ZERO);
        assert_eq!(item.total_deductions, Decimal::ZERO);
        assert_eq!(item.net_pay, Decimal::ZERO);
        assert_eq!(item.warnings, vec![WARN_ZERO_GROSS.to_string()]);
    }

    #[test]
    fn test_extreme_amounts_are_capped_not_overflowed() {
        let mut employee = EmployeePayrollInput::new("emp-1", Decimal::MAX);
        employee.allowance_total = Some(Decimal::MAX);
        employee.working_days_in_period = Some(Decimal::MAX);
        employee.bik.loan = Some(LoanBenefit {
            principal_outstanding: Decimal::MAX,
            employee_interest_rate: Decimal::ZERO,
        });

        let item = compute_item(&employee, &RuleConfig::default());
        assert_eq!(item.proration_factor, Decimal::ONE);
        assert_eq!(item.prorated_basic_pay, MAX_AMOUNT);
        assert_eq!(item.gross_pay, MAX_AMOUNT * dec!(2));
        assert!(item.net_pay > Decimal::ZERO);
        assert_eq!(item.warnings, vec![WARN_AMOUNT_CAPPED.to_string()]);
    }

    #[test]
    fn test_batch_totals_of_extreme_amounts() {
        let employees: Vec<_> = (0..10)
            .map(|i| {
                let mut employee = EmployeePayrollInput::new(format!("emp-{i}"), Decimal::MAX);
                employee.bonus_pay = Some(Decimal::MAX);
                employee
            })
            .collect();

        let result = compute_payroll(&employees, &RuleConfig::default());
        assert_eq!(result.gross_total, MAX_AMOUNT * dec!(20));
        assert_eq!(result.net_total + result.deduction_total, result.gross_total);
        assert!(result.statutory.sdl > Decimal::ZERO);
        assert_eq!(result.warnings.len(), 10);
        assert!(result.items.iter().all(|item| item.warnings[0] == WARN_AMOUNT_CAPPED));
    }

    #[test]
    fn test_benefits_raise_taxable_pay_but_not_pension() {
        let mut employee = EmployeePayrollInput::new("emp-1", dec!(2000000));
        employee.bik = BenefitsInKind {
            housing: Some(HousingBenefit {
                market_rent: dec!(500000),
                employer_deductible_expense: dec!(300000),
                employee_contribution: dec!(50000),
            }),
            vehicle: Some(VehicleBenefit {
                engine_cc: dec!(1800),
                vehicle_age_years: dec!(3),
                employer_claims_deduction: true,
            }),
            loan: Some(LoanBenefit {
                principal_outstanding: dec!(6000000),
                employee_interest_rate: dec!(0.05),
            }),
            other_taxable_value: Some(dec!(10000)),
        };

        let item = compute_item(&employee, &RuleConfig::default());
        assert_eq!(item.gross_pay, dec!(2000000));
        assert_eq!(item.bik_housing_taxable, dec!(250000));
        assert_eq!(item.bik_vehicle_taxable, dec!(41666.67));
        assert_eq!(item.bik_loan_taxable, dec!(55000));
        assert_eq!(item.bik_other_taxable, dec!(10000));
        assert_eq!(item.taxable_pay, dec!(2356666.67));
        assert_eq!(item.nssf_deduction, dec!(200000));
        assert_eq!(item.net_pay, item.gross_pay - item.total_deductions);
    }
}
