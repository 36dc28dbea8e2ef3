//! Benefit-in-kind valuation.
//!
//! Each function returns the monthly taxable value a non-cash benefit
//! adds to an employee's pay.  Values are never negative and are rounded
//! to cents.

use crate::models::{HousingBenefit, LoanBenefit, VehicleBenefit};
use crate::money::{capped_amount, non_negative, round2};
use crate::rules::RuleConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const MONTHS_PER_YEAR: Decimal = dec!(12);

/// Taxable value of employer-provided housing.
///
/// The benefit is quantified as the lower of market rent and the higher
/// of (reference income × housing rate) and the employer's deductible
/// expense, less whatever the employee contributes.  `reference_income`
/// is the employee's gross pay for the period.
pub fn housing_taxable_value(
    housing: &HousingBenefit,
    reference_income: Decimal,
    rules: &RuleConfig,
) -> Decimal {
    let market_rent = capped_amount(housing.market_rent);
    let employer_expense = capped_amount(housing.employer_deductible_expense);
    let employee_contribution = capped_amount(housing.employee_contribution);
    let income_based = capped_amount(reference_income) * rules.bik_housing_income_rate;

    let quantified = market_rent.min(income_based.max(employer_expense));
    round2(non_negative(quantified - employee_contribution))
}

/// Monthly taxable value of a company vehicle.
///
/// The first band in the configured order that matches the engine size
/// and age supplies the annual amount.  Vehicles without an employer
/// deduction claim, and vehicles matching no band, are worth nothing.
pub fn vehicle_taxable_value(vehicle: &VehicleBenefit, rules: &RuleConfig) -> Decimal {
    if !vehicle.employer_claims_deduction {
        return Decimal::ZERO;
    }

    let annual = rules
        .motor_vehicle_benefit_bands
        .iter()
        .find(|band| band.matches(vehicle.engine_cc, vehicle.vehicle_age_years))
        .map(|band| band.amount)
        .unwrap_or(Decimal::ZERO);

    round2(annual / MONTHS_PER_YEAR)
}

/// Monthly taxable value of a subsidised loan: the interest forgone
/// relative to the statutory reference rate.
pub fn loan_taxable_value(loan: &LoanBenefit, rules: &RuleConfig) -> Decimal {
    let principal = capped_amount(loan.principal_outstanding);
    let employee_rate = non_negative(loan.employee_interest_rate);
    let rate_gap = non_negative(rules.bik_loan_statutory_interest_rate - employee_rate);
    round2(principal * rate_gap / MONTHS_PER_YEAR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::MAX_AMOUNT;
    use crate::rules::VehicleBenefitBand;

    #[test]
    fn test_housing_uses_employer_expense_floor() {
        let housing = HousingBenefit {
            market_rent: dec!(500000),
            employer_deductible_expense: dec!(300000),
            employee_contribution: dec!(50000),
        };
        let value = housing_taxable_value(&housing, dec!(2000000), &RuleConfig::default());
        assert_eq!(value, dec!(250000));
    }

    #[test]
    fn test_housing_capped_by_market_rent_and_floored_at_zero() {
        let rules = RuleConfig::default();
        let capped = HousingBenefit {
            market_rent: dec!(100000),
            employer_deductible_expense: dec!(0),
            employee_contribution: dec!(0),
        };
        assert_eq!(housing_taxable_value(&capped, dec!(5000000), &rules), dec!(100000));

        let generous = HousingBenefit {
            market_rent: dec!(100000),
            employer_deductible_expense: dec!(80000),
            employee_contribution: dec!(150000),
        };
        assert_eq!(housing_taxable_value(&generous, dec!(100000), &rules), Decimal::ZERO);
    }

    #[test]
    fn test_vehicle_band_lookup() {
        let rules = RuleConfig::default();
        let vehicle = VehicleBenefit {
            engine_cc: dec!(1800),
            vehicle_age_years: dec!(3),
            employer_claims_deduction: true,
        };
        assert_eq!(vehicle_taxable_value(&vehicle, &rules), dec!(41666.67));

        let old_large = VehicleBenefit {
            engine_cc: dec!(3500),
            vehicle_age_years: dec!(8),
            employer_claims_deduction: true,
        };
        assert_eq!(vehicle_taxable_value(&old_large, &rules), dec!(62500));
    }

    #[test]
    fn test_vehicle_without_deduction_claim_is_not_taxed() {
        let vehicle = VehicleBenefit {
            engine_cc: dec!(1800),
            vehicle_age_years: dec!(3),
            employer_claims_deduction: false,
        };
        assert_eq!(vehicle_taxable_value(&vehicle, &RuleConfig::default()), Decimal::ZERO);
    }

    #[test]
    fn test_vehicle_first_matching_band_wins() {
        let mut rules = RuleConfig::default();
        rules.motor_vehicle_benefit_bands = vec![
            VehicleBenefitBand {
                min_engine_cc: None,
                max_engine_cc: Some(dec!(2000)),
                min_age_years: None,
                max_age_years: None,
                amount: dec!(120000),
            },
            VehicleBenefitBand {
                min_engine_cc: Some(dec!(1001)),
                max_engine_cc: Some(dec!(2000)),
                min_age_years: None,
                max_age_years: Some(dec!(5)),
                amount: dec!(600000),
            },
        ];
        let vehicle = VehicleBenefit {
            engine_cc: dec!(1800),
            vehicle_age_years: dec!(3),
            employer_claims_deduction: true,
        };
        assert_eq!(vehicle_taxable_value(&vehicle, &rules), dec!(10000));

        rules.motor_vehicle_benefit_bands.truncate(0);
        assert_eq!(vehicle_taxable_value(&vehicle, &rules), Decimal::ZERO);
    }

    #[test]
    fn test_loan_interest_gap() {
        let rules = RuleConfig::default();
        let loan = LoanBenefit {
            principal_outstanding: dec!(6000000),
            employee_interest_rate: dec!(0.05),
        };
        assert_eq!(loan_taxable_value(&loan, &rules), dec!(55000));

        let above_market = LoanBenefit {
            principal_outstanding: dec!(6000000),
            employee_interest_rate: dec!(0.20),
        };
        assert_eq!(loan_taxable_value(&above_market, &rules), Decimal::ZERO);
    }

    #[test]
    fn test_extreme_inputs_are_capped() {
        let rules = RuleConfig::default();
        let housing = HousingBenefit {
            market_rent: Decimal::MAX,
            employer_deductible_expense: Decimal::MAX,
            employee_contribution: Decimal::ZERO,
        };
        assert_eq!(housing_taxable_value(&housing, Decimal::MAX, &rules), MAX_AMOUNT);

        let loan = LoanBenefit {
            principal_outstanding: Decimal::MAX,
            employee_interest_rate: Decimal::MAX,
        };
        assert_eq!(loan_taxable_value(&loan, &rules), Decimal::ZERO);
    }
}
