//! Statutory rule configuration.
//!
//! A [`RuleConfig`] is an immutable snapshot of every numeric parameter
//! the calculators need: payroll-levy rate and headcount threshold, the
//! flat income-tax rates, the pension rate, benefit-in-kind parameters,
//! the late-filing penalty rate and the two band schedules.  It is always
//! passed explicitly to the calculators; nothing in the crate reads rule
//! parameters from process-wide state.
//!
//! Persisted overrides are stored as loosely typed JSON key/value
//! entries.  [`RuleConfig::with_overrides`] layers them onto a base
//! config one field at a time.  An entry that cannot be parsed never
//! fails the merge: the base value for that field is kept, so a bad
//! override can never block a payroll run.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::money::{is_unit_rate, MAX_AMOUNT};

/// Override key for the payroll levy (`{rate, employee_threshold}`).
pub const SDL_RATE: &str = "SDL_RATE";
pub const NON_RESIDENT_PAYE_RATE: &str = "NON_RESIDENT_PAYE_RATE";
pub const DIRECTOR_NON_FULL_TIME_RATE: &str = "DIRECTOR_NON_FULL_TIME_RATE";
pub const SECONDARY_EMPLOYMENT_RATE: &str = "SECONDARY_EMPLOYMENT_RATE";
pub const NSSF_EMPLOYEE_RATE: &str = "NSSF_EMPLOYEE_RATE";
/// Override key for housing benefit (`{income_rate}`).
pub const BIK_HOUSING: &str = "BIK_HOUSING";
/// Override key for loan benefit (`{statutory_interest_rate}`).
pub const BIK_LOAN: &str = "BIK_LOAN";
pub const FILING_PENALTY_DAILY_RATE: &str = "FILING_PENALTY_DAILY_RATE";
/// Override key for the resident primary-employment schedule
/// (`{bands: [{from, to, rate}, ...]}`).
pub const PAYE_BANDS_RESIDENT_PRIMARY: &str = "PAYE_BANDS_RESIDENT_PRIMARY";
/// Override key for the vehicle benefit schedule
/// (`{bands: [{min_engine_cc?, max_engine_cc?, min_age_years?, max_age_years?, amount}, ...]}`).
pub const MOTOR_VEHICLE_BIK_ANNUAL: &str = "MOTOR_VEHICLE_BIK_ANNUAL";

/// One band of the progressive income-tax schedule.
///
/// `from` is inclusive.  `to` is the upper bound, or `None` for the
/// final, unbounded band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveBand {
    pub from: Decimal,
    pub to: Option<Decimal>,
    pub rate: Decimal,
}

/// One band of the annual vehicle benefit schedule.  Every bound is
/// optional; a missing bound does not constrain the match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleBenefitBand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_engine_cc: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_engine_cc: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age_years: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_years: Option<Decimal>,
    /// Flat annual benefit amount.
    pub amount: Decimal,
}

impl VehicleBenefitBand {
    /// Whether a vehicle with the given engine size and age falls in
    /// this band.
    pub fn matches(&self, engine_cc: Decimal, age_years: Decimal) -> bool {
        if self.min_engine_cc.is_some_and(|min| engine_cc < min) {
            return false;
        }
        if self.max_engine_cc.is_some_and(|max| engine_cc > max) {
            return false;
        }
        if self.max_age_years.is_some_and(|max| age_years > max) {
            return false;
        }
        if self.min_age_years.is_some_and(|min| age_years < min) {
            return false;
        }
        true
    }
}

/// Numeric payroll rule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Skills & Development Levy rate on total gross emoluments.
    pub sdl_rate: Decimal,
    /// Minimum headcount in a batch before the levy applies.
    pub sdl_employee_threshold: Decimal,
    pub non_resident_paye_rate: Decimal,
    pub director_non_full_time_rate: Decimal,
    pub secondary_employment_rate: Decimal,
    /// Employee-side pension (NSSF) contribution rate.
    pub nssf_employee_rate: Decimal,
    /// Share of reference income used to value housing.
    pub bik_housing_income_rate: Decimal,
    /// Reference interest rate used to value subsidised loans.
    pub bik_loan_statutory_interest_rate: Decimal,
    pub filing_penalty_daily_rate: Decimal,
    /// Sorted ascending; the last band is unbounded.
    pub paye_bands_resident_primary: Vec<ProgressiveBand>,
    /// Evaluated in order, first match wins.
    pub motor_vehicle_benefit_bands: Vec<VehicleBenefitBand>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            sdl_rate: dec!(0.035),
            sdl_employee_threshold: dec!(10),
            non_resident_paye_rate: dec!(0.15),
            director_non_full_time_rate: dec!(0.15),
            secondary_employment_rate: dec!(0.30),
            nssf_employee_rate: dec!(0.10),
            bik_housing_income_rate: dec!(0.15),
            bik_loan_statutory_interest_rate: dec!(0.16),
            filing_penalty_daily_rate: dec!(0.0005),
            paye_bands_resident_primary: default_resident_bands(),
            motor_vehicle_benefit_bands: default_vehicle_bands(),
        }
    }
}

fn band(from: Decimal, to: Option<Decimal>, rate: Decimal) -> ProgressiveBand {
    ProgressiveBand { from, to, rate }
}

fn default_resident_bands() -> Vec<ProgressiveBand> {
    vec![
        band(dec!(0), Some(dec!(270000)), dec!(0)),
        band(dec!(270000.01), Some(dec!(520000)), dec!(0.08)),
        band(dec!(520000.01), Some(dec!(760000)), dec!(0.20)),
        band(dec!(760000.01), Some(dec!(1000000)), dec!(0.25)),
        band(dec!(1000000.01), None, dec!(0.30)),
    ]
}

fn vehicle(
    engine: (Option<Decimal>, Option<Decimal>),
    age: (Option<Decimal>, Option<Decimal>),
    amount: Decimal,
) -> VehicleBenefitBand {
    VehicleBenefitBand {
        min_engine_cc: engine.0,
        max_engine_cc: engine.1,
        min_age_years: age.0,
        max_age_years: age.1,
        amount,
    }
}

fn default_vehicle_bands() -> Vec<VehicleBenefitBand> {
    let new = (None, Some(dec!(5)));
    let old = (Some(dec!(6)), None);
    vec![
        vehicle((None, Some(dec!(1000))), new, dec!(250000)),
        vehicle((None, Some(dec!(1000))), old, dec!(125000)),
        vehicle((Some(dec!(1001)), Some(dec!(2000))), new, dec!(500000)),
        vehicle((Some(dec!(1001)), Some(dec!(2000))), old, dec!(250000)),
        vehicle((Some(dec!(2001)), Some(dec!(3000))), new, dec!(1000000)),
        vehicle((Some(dec!(2001)), Some(dec!(3000))), old, dec!(500000)),
        vehicle((Some(dec!(3001)), None), new, dec!(1500000)),
        vehicle((Some(dec!(3001)), None), old, dec!(750000)),
    ]
}

/// A persisted key/value override belonging to a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub key: String,
    pub value: Value,
}

/// Outcome of reading one override field.
#[derive(Debug, Clone, PartialEq)]
pub enum Override<T> {
    /// No entry, or the entry does not mention this field.
    Absent,
    /// The entry is present but unusable.
    Malformed,
    Parsed(T),
}

impl<T> Override<T> {
    /// Resolve to the parsed value or the supplied fallback.
    pub fn or_default(self, fallback: T) -> T {
        match self {
            Override::Parsed(value) => value,
            Override::Absent | Override::Malformed => fallback,
        }
    }

    fn and_then<U>(self, f: impl FnOnce(T) -> Override<U>) -> Override<U> {
        match self {
            Override::Parsed(value) => f(value),
            Override::Absent => Override::Absent,
            Override::Malformed => Override::Malformed,
        }
    }
}

/// Parse a JSON number or numeric string into a decimal.
pub fn parse_decimal(value: &Value) -> Override<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Null => return Override::Absent,
        _ => return Override::Malformed,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Override::Parsed)
        .unwrap_or(Override::Malformed)
}

/// Read `field` of an object-valued override entry as a decimal.
fn decimal_field(entry: Option<&Value>, field: &str) -> Override<Decimal> {
    match entry.and_then(|v| v.as_object()).and_then(|o| o.get(field)) {
        Some(value) => parse_decimal(value),
        None => Override::Absent,
    }
}

/// Read the `bands` array of an object-valued override entry.
fn bands_field(entry: Option<&Value>) -> Override<&Vec<Value>> {
    match entry.and_then(|v| v.as_object()).and_then(|o| o.get("bands")) {
        Some(Value::Array(items)) => Override::Parsed(items),
        Some(_) => Override::Malformed,
        None => Override::Absent,
    }
}

fn optional_decimal(row: &serde_json::Map<String, Value>, field: &str) -> Result<Option<Decimal>, ()> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match parse_decimal(value) {
            Override::Parsed(d) => Ok(Some(d)),
            _ => Err(()),
        },
    }
}

/// Parse a progressive schedule.  The whole list is rejected if any band
/// is malformed (including a negative lower bound or a rate outside
/// `[0, 1]`) or if the sorted bands are not contiguous and
/// non-overlapping with a single unbounded band at the end.
pub fn parse_progressive_bands(items: &[Value]) -> Override<Vec<ProgressiveBand>> {
    let mut bands = Vec::with_capacity(items.len());
    for item in items {
        let Some(row) = item.as_object() else {
            return Override::Malformed;
        };
        let (Ok(Some(from)), Ok(to), Ok(Some(rate))) = (
            optional_decimal(row, "from"),
            optional_decimal(row, "to"),
            optional_decimal(row, "rate"),
        ) else {
            return Override::Malformed;
        };
        if from < Decimal::ZERO || !is_unit_rate(rate) {
            return Override::Malformed;
        }
        bands.push(ProgressiveBand { from, to, rate });
    }
    bands.sort_by(|a, b| a.from.cmp(&b.from));
    if progressive_bands_are_valid(&bands) {
        Override::Parsed(bands)
    } else {
        Override::Malformed
    }
}

/// Check the schedule invariant on bands already sorted by `from`.
pub fn progressive_bands_are_valid(bands: &[ProgressiveBand]) -> bool {
    let Some((last, rest)) = bands.split_last() else {
        return false;
    };
    if last.to.is_some() {
        return false;
    }
    let mut previous_upper: Option<Decimal> = None;
    for band in rest {
        let Some(upper) = band.to else {
            return false;
        };
        if upper < band.from || previous_upper.is_some_and(|p| band.from < p) {
            return false;
        }
        previous_upper = Some(upper);
    }
    previous_upper.map_or(true, |p| last.from >= p)
}

/// Parse a vehicle schedule, keeping list order.  Individual malformed
/// bands, including those whose amount is negative or above
/// [`MAX_AMOUNT`], are dropped; an empty result counts as malformed.
pub fn parse_vehicle_bands(items: &[Value]) -> Override<Vec<VehicleBenefitBand>> {
    let bands: Vec<VehicleBenefitBand> = items
        .iter()
        .filter_map(|item| {
            let row = item.as_object()?;
            let amount = optional_decimal(row, "amount")
                .ok()
                .flatten()
                .filter(|amount| *amount >= Decimal::ZERO && *amount <= MAX_AMOUNT)?;
            Some(VehicleBenefitBand {
                min_engine_cc: optional_decimal(row, "min_engine_cc").ok()?,
                max_engine_cc: optional_decimal(row, "max_engine_cc").ok()?,
                min_age_years: optional_decimal(row, "min_age_years").ok()?,
                max_age_years: optional_decimal(row, "max_age_years").ok()?,
                amount,
            })
        })
        .collect();
    if bands.is_empty() {
        Override::Malformed
    } else {
        Override::Parsed(bands)
    }
}

impl RuleConfig {
    /// Layer persisted overrides onto `self`.  When the same key appears
    /// more than once, the later entry wins.
    pub fn with_overrides(&self, entries: &[RuleEntry]) -> RuleConfig {
        let map: BTreeMap<&str, &Value> = entries
            .iter()
            .map(|entry| (entry.key.as_str(), &entry.value))
            .collect();
        let get = |key: &str| map.get(key).copied();

        let field = |key: &str, name: &str, fallback: Decimal| {
            let parsed = decimal_field(get(key), name);
            if parsed == Override::Malformed {
                tracing::debug!(key, field = name, "ignoring malformed rule override");
            }
            parsed.or_default(fallback)
        };
        // Rates outside [0, 1] are treated as malformed.
        let rate = |key: &str, name: &str, fallback: Decimal| {
            let parsed = decimal_field(get(key), name).and_then(|value| {
                if is_unit_rate(value) {
                    Override::Parsed(value)
                } else {
                    Override::Malformed
                }
            });
            if parsed == Override::Malformed {
                tracing::debug!(key, field = name, "ignoring malformed rule override");
            }
            parsed.or_default(fallback)
        };

        let paye_bands = bands_field(get(PAYE_BANDS_RESIDENT_PRIMARY)).and_then(|b| parse_progressive_bands(b));
        if paye_bands == Override::Malformed {
            tracing::debug!(key = PAYE_BANDS_RESIDENT_PRIMARY, "ignoring malformed band override");
        }
        let vehicle_bands = bands_field(get(MOTOR_VEHICLE_BIK_ANNUAL)).and_then(|b| parse_vehicle_bands(b));
        if vehicle_bands == Override::Malformed {
            tracing::debug!(key = MOTOR_VEHICLE_BIK_ANNUAL, "ignoring malformed band override");
        }

        RuleConfig {
            sdl_rate: rate(SDL_RATE, "rate", self.sdl_rate),
            sdl_employee_threshold: field(SDL_RATE, "employee_threshold", self.sdl_employee_threshold),
            non_resident_paye_rate: rate(NON_RESIDENT_PAYE_RATE, "rate", self.non_resident_paye_rate),
            director_non_full_time_rate: rate(
                DIRECTOR_NON_FULL_TIME_RATE,
                "rate",
                self.director_non_full_time_rate,
            ),
            secondary_employment_rate: rate(SECONDARY_EMPLOYMENT_RATE, "rate", self.secondary_employment_rate),
            nssf_employee_rate: rate(NSSF_EMPLOYEE_RATE, "rate", self.nssf_employee_rate),
            bik_housing_income_rate: rate(BIK_HOUSING, "income_rate", self.bik_housing_income_rate),
            bik_loan_statutory_interest_rate: rate(
                BIK_LOAN,
                "statutory_interest_rate",
                self.bik_loan_statutory_interest_rate,
            ),
            filing_penalty_daily_rate: rate(FILING_PENALTY_DAILY_RATE, "rate", self.filing_penalty_daily_rate),
            paye_bands_resident_primary: paye_bands.or_default(self.paye_bands_resident_primary.clone()),
            motor_vehicle_benefit_bands: vehicle_bands.or_default(self.motor_vehicle_benefit_bands.clone()),
        }
    }
}
