//! `sitewatch billing`: due status over an exported account list.

use std::fs;
use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Local;
use chrono::NaiveDateTime;
use clap::Args;
use sitewatch_core::billing;
use sitewatch_core::billing::AccountDue;
use sitewatch_core::billing::BillingAccount;
use sitewatch_core::classify::DueStatus;
use sitewatch_core::classify::parse_timestamp;

use crate::Context;
use crate::output::print_json;
use crate::output::table;

#[derive(Debug, Args)]
pub struct BillingArgs {
    /// JSON array of billing accounts.
    #[arg(long, value_name = "FILE")]
    pub accounts: PathBuf,

    /// Evaluate as of this time instead of now.
    #[arg(long, value_parser = now_override)]
    pub now: Option<NaiveDateTime>,

    /// List every account, not only the summary.
    #[arg(long)]
    pub all: bool,
}

fn status_label(status: DueStatus) -> &'static str {
    match status {
        DueStatus::Paid => "paid",
        DueStatus::Overdue => "overdue",
        DueStatus::DueSoon => "due soon",
        DueStatus::Upcoming => "upcoming",
    }
}

fn now_override(value: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(value).ok_or_else(|| format!("'{value}' is not a timestamp"))
}

pub fn load_accounts(path: &std::path::Path) -> anyhow::Result<Vec<BillingAccount>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn run(ctx: &Context, args: &BillingArgs) -> anyhow::Result<()> {
    let accounts = load_accounts(&args.accounts)?;
    let now = args.now.unwrap_or_else(|| Local::now().naive_local());
    let summary = billing::summarize(&accounts, now);

    if ctx.json {
        if args.all {
            let evaluated: Vec<AccountDue> = accounts
                .iter()
                .map(|a| AccountDue::evaluate(a, now))
                .collect();
            return print_json(&serde_json::json!({ "summary": summary, "accounts": evaluated }));
        }
        return print_json(&summary);
    }

    println!(
        "Revenue {:.2}  pending {:.2}  paid {}/{}  overdue {}",
        summary.total_revenue,
        summary.pending_amount,
        summary.paid_count,
        summary.active_accounts,
        summary.overdue_count
    );
    let listed: Vec<AccountDue> = if args.all {
        accounts.iter().map(|a| AccountDue::evaluate(a, now)).collect()
    } else {
        summary.upcoming_due
    };
    if listed.is_empty() {
        println!("Nothing overdue or due soon.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = listed
        .iter()
        .map(|a| {
            vec![
                a.site_name.clone(),
                status_label(a.status).to_string(),
                a.due_date.format("%Y-%m-%d").to_string(),
                a.days_until_due.to_string(),
                format!("{:.2}", a.monthly_payment),
            ]
        })
        .collect();
    println!("{}", table(&["SITE", "STATUS", "DUE", "DAYS", "AMOUNT"], &rows));
    Ok(())
}
