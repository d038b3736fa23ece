//! Contract defaults: numbering, dates and standard terms.

use chrono::{DateTime, Months, NaiveDate, Utc};
use common::Money;
use store::ContractTerms;
use uuid::Uuid;

use crate::error::{DomainError, Result};

pub const DEFAULT_DURATION_MONTHS: u32 = 11;
pub const MAX_DURATION_MONTHS: u32 = 36;

const NOTICE_PERIOD_DAYS: u32 = 30;
const RENT_DUE_DAY: u32 = 5;
const LATE_FEE_PER_DAY_MINOR: i64 = 50_00;

/// Generates a contract number of the form `CTR-YYYYMMDD-XXXXXXXX`.
pub fn contract_number(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("CTR-{}-{}", at.format("%Y%m%d"), suffix)
}

/// Standard terms for a contract at the given rent.
pub fn default_terms(monthly_rent: Money) -> ContractTerms {
    ContractTerms {
        notice_period_days: NOTICE_PERIOD_DAYS,
        rent_due_day: RENT_DUE_DAY,
        late_fee_per_day: Money::from_minor(LATE_FEE_PER_DAY_MINOR),
        early_termination_penalty: monthly_rent,
        clauses: vec![
            format!("Rent is due on day {RENT_DUE_DAY} of each month."),
            format!(
                "A late fee of {} applies for each day rent is overdue.",
                Money::from_minor(LATE_FEE_PER_DAY_MINOR)
            ),
            format!("Either party must give {NOTICE_PERIOD_DAYS} days' notice to end the contract."),
            "Ending the contract early forfeits one month's rent.".to_string(),
            "The security deposit is refunded at move-out, less any damages.".to_string(),
        ],
    }
}

/// Returns the last day covered by a contract of `months` starting on `start`.
pub fn end_date(start: NaiveDate, months: u32) -> Result<NaiveDate> {
    if months == 0 || months > MAX_DURATION_MONTHS {
        return Err(DomainError::Validation(format!(
            "contract duration must be between 1 and {MAX_DURATION_MONTHS} months"
        )));
    }
    start
        .checked_add_months(Months::new(months))
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| DomainError::Validation("contract dates out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_contract_number_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let number = contract_number(at);
        assert!(number.starts_with("CTR-20260307-"));
        assert_eq!(number.len(), "CTR-20260307-".len() + 8);
        assert!(number[13..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_default_terms() {
        let terms = default_terms(Money::from_major(8000));
        assert_eq!(terms.notice_period_days, 30);
        assert_eq!(terms.rent_due_day, 5);
        assert_eq!(terms.late_fee_per_day, Money::from_major(50));
        assert_eq!(terms.early_termination_penalty, Money::from_major(8000));
        assert!(!terms.clauses.is_empty());
    }

    #[test]
    fn test_end_date() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(
            end_date(start, 11).unwrap(),
            NaiveDate::from_ymd_opt(2026, 11, 30).unwrap()
        );
        assert!(end_date(start, 0).is_err());
        assert!(end_date(start, 37).is_err());
    }
}
