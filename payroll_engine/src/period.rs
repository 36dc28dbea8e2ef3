//! Monthly payroll periods.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Day of the following month on which statutory returns are due.
pub const FILING_DUE_DAY: u32 = 7;

pub const MIN_PERIOD_YEAR: i32 = 1900;
pub const MAX_PERIOD_YEAR: i32 = 9999;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("period_year and period_month (1-12) are required")]
    InvalidMonth,

    #[error("period_year must be between 1900 and 9999 (got {0})")]
    InvalidYear(i32),
}

/// A calendar month being paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayrollPeriod {
    pub year: i32,
    pub month: u32,
}

impl PayrollPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth);
        }
        if !(MIN_PERIOD_YEAR..=MAX_PERIOD_YEAR).contains(&year) {
            return Err(PeriodError::InvalidYear(year));
        }
        Ok(Self { year, month })
    }

    fn following(&self) -> (i32, u32) {
        if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        }
    }

    /// First day of the month.
    pub fn starts_on(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the month.  Rules for the period are resolved as of
    /// this date.
    pub fn ends_on(&self) -> NaiveDate {
        let (year, month) = self.following();
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|first| first.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// Monday to Friday days in the month.
    pub fn working_days(&self) -> u32 {
        let end = self.ends_on();
        let mut day = self.starts_on();
        let mut count = 0;
        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                count += 1;
            }
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        count
    }

    /// Due date of the statutory returns for this period.
    pub fn filing_due_date(&self) -> NaiveDate {
        let (year, month) = self.following();
        NaiveDate::from_ymd_opt(year, month, FILING_DUE_DAY).unwrap_or(NaiveDate::MAX)
    }

    /// `YYYY-MM` label.
    pub fn label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}
