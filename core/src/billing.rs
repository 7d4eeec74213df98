//! Billing dashboard: per-account due status and the monthly summary.

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de;

use crate::classify::DueDay;
use crate::classify::DueStatus;
use crate::classify::PaymentRemarks;
use crate::classify::classify_due;
use crate::classify::due_date;
use crate::classify::due_status::days_until_due;

/// How many actionable accounts the summary lists.
const UPCOMING_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub site_name: String,
    pub due_day: DueDay,
    /// Exports carry either a plain date or a full RFC 3339 timestamp.
    #[serde(default, deserialize_with = "paid_month")]
    pub last_paid_month: Option<NaiveDate>,
    pub remarks: PaymentRemarks,
    /// A missing or null amount counts as zero.
    #[serde(default, deserialize_with = "amount")]
    pub monthly_payment: f64,
}

fn paid_month<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.date_naive()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| {
            <D::Error as de::Error>::custom(format!(
                "'{raw}' is neither a date nor an RFC 3339 timestamp"
            ))
        })
}

fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountDue {
    pub site_name: String,
    pub status: DueStatus,
    pub due_date: NaiveDate,
    pub days_until_due: i64,
    pub monthly_payment: f64,
}

impl AccountDue {
    pub fn evaluate(account: &BillingAccount, now: NaiveDateTime) -> Self {
        let due = due_date(account.due_day, account.last_paid_month, now.date());
        Self {
            site_name: account.site_name.clone(),
            status: classify_due(
                account.due_day,
                account.last_paid_month,
                account.remarks,
                now,
            ),
            due_date: due,
            days_until_due: days_until_due(due, now),
            monthly_payment: account.monthly_payment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingSummary {
    pub active_accounts: usize,
    pub total_revenue: f64,
    pub pending_amount: f64,
    pub paid_count: usize,
    pub overdue_count: usize,
    /// Overdue and due-soon accounts, most urgent first.
    pub upcoming_due: Vec<AccountDue>,
}

pub fn summarize(accounts: &[BillingAccount], now: NaiveDateTime) -> BillingSummary {
    let evaluated: Vec<AccountDue> = accounts
        .iter()
        .map(|account| AccountDue::evaluate(account, now))
        .collect();

    let total_revenue = evaluated.iter().map(|a| a.monthly_payment).sum();
    let pending_amount = evaluated
        .iter()
        .filter(|a| a.status != DueStatus::Paid)
        .map(|a| a.monthly_payment)
        .sum();
    let paid_count = evaluated
        .iter()
        .filter(|a| a.status == DueStatus::Paid)
        .count();
    let overdue_count = evaluated
        .iter()
        .filter(|a| a.status == DueStatus::Overdue)
        .count();

    let mut upcoming_due: Vec<AccountDue> = evaluated
        .into_iter()
        .filter(|a| a.status.is_actionable())
        .collect();
    upcoming_due.sort_by_key(|a| a.days_until_due);
    upcoming_due.truncate(UPCOMING_LIMIT);

    BillingSummary {
        active_accounts: accounts.len(),
        total_revenue,
        pending_amount,
        paid_count,
        overdue_count,
        upcoming_due,
    }
}
