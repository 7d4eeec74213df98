//! Billing due-status.
//!
//! The due date is the account's due day in the current month, at local
//! midnight. An account already paid this month is due next month instead.
//! Days that do not exist in a short month clamp to its last day.

use chrono::Datelike;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

use crate::error::SheetsError;

const DAY_MS: i64 = 86_400_000;

/// Accounts due within this many days are "due soon".
pub const DUE_SOON_DAYS: i64 = 7;

/// Day of month in `1..=31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DueDay(u32);

impl DueDay {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for DueDay {
    type Error = SheetsError;

    fn try_from(day: u32) -> Result<Self, Self::Error> {
        if (1..=31).contains(&day) {
            Ok(DueDay(day))
        } else {
            Err(SheetsError::InvalidInput(format!(
                "due day {day} is outside 1..=31"
            )))
        }
    }
}

impl From<DueDay> for u32 {
    fn from(day: DueDay) -> Self {
        day.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentRemarks {
    Paid,
    Unpaid,
}

impl PaymentRemarks {
    /// Anything other than "paid" (any case) is unpaid.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("paid") {
            PaymentRemarks::Paid
        } else {
            PaymentRemarks::Unpaid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DueStatus {
    Paid,
    Overdue,
    DueSoon,
    Upcoming,
}

impl DueStatus {
    /// Needs attention on the billing dashboard.
    pub fn is_actionable(self) -> bool {
        matches!(self, DueStatus::Overdue | DueStatus::DueSoon)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

fn clamped_date(year: i32, month: u32, day: DueDay) -> NaiveDate {
    let day = day.get().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

/// Next due date relative to `today`.
pub fn due_date(due_day: DueDay, last_paid: Option<NaiveDate>, today: NaiveDate) -> NaiveDate {
    let paid_this_month =
        last_paid.is_some_and(|paid| paid.year() == today.year() && paid.month() == today.month());
    let (year, month) = match (paid_this_month, today.month()) {
        (false, month) => (today.year(), month),
        (true, 12) => (today.year() + 1, 1),
        (true, month) => (today.year(), month + 1),
    };
    clamped_date(year, month, due_day)
}

/// Whole days until `due` measured from `now`, rounded up.
pub fn days_until_due(due: NaiveDate, now: NaiveDateTime) -> i64 {
    let due_midnight = due.and_time(chrono::NaiveTime::MIN);
    let ms = (due_midnight - now).num_milliseconds();
    let days = ms.div_euclid(DAY_MS);
    if ms.rem_euclid(DAY_MS) == 0 {
        days
    } else {
        days + 1
    }
}

pub fn classify_due(
    due_day: DueDay,
    last_paid: Option<NaiveDate>,
    remarks: PaymentRemarks,
    now: NaiveDateTime,
) -> DueStatus {
    if remarks == PaymentRemarks::Paid {
        return DueStatus::Paid;
    }
    let days = days_until_due(due_date(due_day, last_paid, now.date()), now);
    if days < 0 {
        DueStatus::Overdue
    } else if days <= DUE_SOON_DAYS {
        DueStatus::DueSoon
    } else {
        DueStatus::Upcoming
    }
}
