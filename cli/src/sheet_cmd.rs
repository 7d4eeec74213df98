//! Commands that read or write a phase's tabs.

use chrono::Local;
use chrono::NaiveDateTime;
use clap::Args;
use serde::Serialize;
use sitewatch_core::Orchestrator;
use sitewatch_core::TabKind;
use sitewatch_core::TabTarget;
use sitewatch_core::bindings::FieldRole;
use sitewatch_core::classify::parse_timestamp;
use sitewatch_core::downtime::DowntimeEntry;
use sitewatch_core::downtime::format_timestamp;
use sitewatch_core::orchestrator::TabView;
use sitewatch_core::view;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Context;
use crate::output::RecordOut;
use crate::output::page_footer;
use crate::output::print_json;
use crate::output::role_cell;
use crate::output::table;
use crate::sites_failed;

fn timestamp(value: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(value).ok_or_else(|| {
        format!("'{value}' is not a timestamp (expected e.g. 03/01/2025 14:30 or 2025-03-01 14:30)")
    })
}

#[derive(Debug, Args)]
pub struct PhaseArg {
    /// Phase name or id (defaults to the first registered phase).
    #[arg(long)]
    pub phase: Option<String>,
}

#[derive(Debug, Args)]
pub struct TabArgs {
    /// Phase name or id (defaults to the first registered phase).
    #[arg(long)]
    pub phase: Option<String>,

    /// Tab name (defaults to the phase's tab).
    #[arg(long)]
    pub tab: Option<String>,
}

impl TabArgs {
    async fn target(
        &self,
        orchestrator: &Orchestrator,
        kind: TabKind,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TabTarget> {
        Ok(orchestrator
            .target(self.phase.as_deref(), self.tab.as_deref(), kind, cancel)
            .await?)
    }
}

#[derive(Debug, Args)]
pub struct RecordsArgs {
    #[command(flatten)]
    pub tab: TabArgs,

    /// Case-insensitive text to look for in any cell.
    #[arg(long)]
    pub search: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = view::DEFAULT_PAGE_SIZE)]
    pub page_size: usize,
}

#[derive(Debug, Args)]
pub struct EscalationsArgs {
    #[command(flatten)]
    pub tab: TabArgs,

    /// Only records of this project.
    #[arg(long)]
    pub project: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = view::DEFAULT_PAGE_SIZE)]
    pub page_size: usize,
}

#[derive(Debug, Args)]
pub struct SetEndArgs {
    #[command(flatten)]
    pub tab: TabArgs,

    /// Sheet row of an open record; repeat for several.
    #[arg(long = "row", required = true)]
    pub rows: Vec<u32>,

    /// End time (defaults to now).
    #[arg(long, value_parser = timestamp)]
    pub at: Option<NaiveDateTime>,
}

#[derive(Debug, Args)]
pub struct EscalateArgs {
    #[command(flatten)]
    pub tab: TabArgs,

    /// Sheet row of an escalation record; repeat for several.
    #[arg(long = "row", required = true)]
    pub rows: Vec<u32>,

    #[arg(long)]
    pub cause: Option<String>,

    #[arg(long)]
    pub action_plan: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddDowntimeArgs {
    #[command(flatten)]
    pub tab: TabArgs,

    /// Site code; repeat to log the same event for several sites.
    #[arg(long = "site", required = true)]
    pub sites: Vec<String>,

    #[arg(long, value_parser = timestamp)]
    pub start: NaiveDateTime,

    /// Leave unset for downtime that is still ongoing.
    #[arg(long, value_parser = timestamp)]
    pub end: Option<NaiveDateTime>,

    #[arg(long)]
    pub cause: String,

    /// Written only when an action column is configured.
    #[arg(long)]
    pub action: Option<String>,
}

pub async fn tabs(ctx: &Context, args: &PhaseArg, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let phase = orchestrator.phase(args.phase.as_deref(), cancel).await?;
    let tabs = orchestrator.list_tabs(&phase, cancel).await?;
    if ctx.json {
        return print_json(&tabs);
    }
    for tab in tabs {
        let marker = if tab == phase.default_tab_name { " (default)" } else { "" };
        println!("{tab}{marker}");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DowntimeOut {
    #[serde(flatten)]
    record: RecordOut,
    duration: String,
}

pub async fn records(ctx: &Context, args: &RecordsArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.tab.target(&orchestrator, TabKind::Downtime, cancel).await?;
    let tab = orchestrator.load_tab(&target, cancel).await?;
    let term = args.search.as_deref().unwrap_or_default();
    let rows: Vec<_> = orchestrator
        .downtime_view(&target, cancel)
        .await?
        .into_iter()
        .filter(|row| view::matches(&row.record, term))
        .collect();
    let page = view::paginate(rows, args.page, args.page_size);

    if ctx.json {
        let items: Vec<DowntimeOut> = page
            .items
            .iter()
            .map(|row| DowntimeOut {
                record: RecordOut::from(&row.record),
                duration: row.duration.to_string(),
            })
            .collect();
        return print_json(&view::Page {
            items,
            page: page.page,
            total_pages: page.total_pages,
            total_items: page.total_items,
        });
    }

    let bindings = &tab.bindings;
    let lines: Vec<Vec<String>> = page
        .items
        .iter()
        .map(|row| {
            let r = &row.record;
            vec![
                r.row_number().to_string(),
                role_cell(r, bindings, FieldRole::SiteCode).to_string(),
                role_cell(r, bindings, FieldRole::StartTime).to_string(),
                role_cell(r, bindings, FieldRole::EndTime).to_string(),
                row.duration.to_string(),
                role_cell(r, bindings, FieldRole::Cause).to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        table(&["ROW", "SITE", "START", "END", "DURATION", "CAUSE"], &lines)
    );
    println!("{}", page_footer(&page));
    Ok(())
}

pub async fn no_uptime(ctx: &Context, args: &TabArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.target(&orchestrator, TabKind::Downtime, cancel).await?;
    let records = orchestrator.no_uptime_view(&target, cancel).await?;
    if ctx.json {
        return print_json(&records.iter().map(RecordOut::from).collect::<Vec<_>>());
    }
    if records.is_empty() {
        println!("No open downtime in '{}'.", target.tab_name);
        return Ok(());
    }
    let tab = orchestrator.load_tab(&target, cancel).await?;
    let lines: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.row_number().to_string(),
                role_cell(r, &tab.bindings, FieldRole::SiteCode).to_string(),
                role_cell(r, &tab.bindings, FieldRole::StartTime).to_string(),
                role_cell(r, &tab.bindings, FieldRole::Cause).to_string(),
            ]
        })
        .collect();
    println!("{}", table(&["ROW", "SITE", "START", "CAUSE"], &lines));
    Ok(())
}

#[derive(Debug, Serialize)]
struct EscalationOut {
    #[serde(flatten)]
    record: RecordOut,
    missing_cause: bool,
    missing_action_plan: bool,
}

pub async fn escalations(
    ctx: &Context,
    args: &EscalationsArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.tab.target(&orchestrator, TabKind::Escalation, cancel).await?;
    let tab = orchestrator.load_tab(&target, cancel).await?;
    let mut rows = orchestrator.escalation_view(&target, cancel).await?;
    if let Some(project) = &args.project {
        rows.retain(|row| view::in_project(&row.record, &tab.bindings, project));
        if rows.is_empty() {
            warn_unknown_project(&tab, project);
        }
    }
    let page = view::paginate(rows, args.page, args.page_size);

    if ctx.json {
        let items: Vec<EscalationOut> = page
            .items
            .iter()
            .map(|row| EscalationOut {
                record: RecordOut::from(&row.record),
                missing_cause: row.gap.missing_cause,
                missing_action_plan: row.gap.missing_action_plan,
            })
            .collect();
        return print_json(&view::Page {
            items,
            page: page.page,
            total_pages: page.total_pages,
            total_items: page.total_items,
        });
    }

    let lines: Vec<Vec<String>> = page
        .items
        .iter()
        .map(|row| {
            let r = &row.record;
            let missing = match (row.gap.missing_cause, row.gap.missing_action_plan) {
                (true, true) => "cause, action plan",
                (true, false) => "cause",
                _ => "action plan",
            };
            vec![
                r.row_number().to_string(),
                role_cell(r, &tab.bindings, FieldRole::SiteCode).to_string(),
                role_cell(r, &tab.bindings, FieldRole::Project).to_string(),
                missing.to_string(),
            ]
        })
        .collect();
    println!("{}", table(&["ROW", "SITE", "PROJECT", "MISSING"], &lines));
    println!("{}", page_footer(&page));
    Ok(())
}

fn warn_unknown_project(tab: &TabView, project: &str) {
    let known = view::projects(&tab.snapshot.records, &tab.bindings);
    if !known.iter().any(|p| p.eq_ignore_ascii_case(project.trim())) {
        warn!(project, known = %known.join(", "), "no such project in this tab");
    }
}

pub async fn next_row(ctx: &Context, args: &TabArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.target(&orchestrator, TabKind::Downtime, cancel).await?;
    let row = orchestrator.next_append_row(&target, cancel).await?;
    if ctx.json {
        return print_json(&serde_json::json!({ "tab": target.tab_name, "row": row }));
    }
    println!("{row}");
    Ok(())
}

pub async fn set_end(ctx: &Context, args: &SetEndArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.tab.target(&orchestrator, TabKind::Downtime, cancel).await?;
    let end = args.at.unwrap_or_else(|| Local::now().naive_local());
    orchestrator
        .update_end_time(&target, &args.rows, end, cancel)
        .await?;
    report_update(ctx, &args.rows, &format!("end time {}", format_timestamp(end)))
}

pub async fn escalate(ctx: &Context, args: &EscalateArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.tab.target(&orchestrator, TabKind::Escalation, cancel).await?;
    orchestrator
        .update_escalation_fields(
            &target,
            &args.rows,
            args.cause.as_deref(),
            args.action_plan.as_deref(),
            cancel,
        )
        .await?;
    report_update(ctx, &args.rows, "escalation fields")
}

fn report_update(ctx: &Context, rows: &[u32], what: &str) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(&serde_json::json!({ "updated_rows": rows }));
    }
    let rows: Vec<String> = rows.iter().map(u32::to_string).collect();
    println!("Wrote {what} to row(s) {}.", rows.join(", "));
    Ok(())
}

pub async fn add_downtime(
    ctx: &Context,
    args: &AddDowntimeArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let orchestrator = ctx.sheets()?;
    let target = args.tab.target(&orchestrator, TabKind::Downtime, cancel).await?;
    let entry = DowntimeEntry::new(
        &args.sites[0],
        args.start,
        args.end,
        &args.cause,
        args.action.as_deref(),
    )?;

    if let [_] = args.sites.as_slice() {
        let outcome = orchestrator.append_downtime(&target, &entry, cancel).await?;
        if ctx.json {
            return print_json(&serde_json::json!({ "site_code": entry.site_code, "row": outcome.row }));
        }
        println!("Appended {} at row {}.", entry.site_code, outcome.row);
        return Ok(());
    }

    let outcomes = orchestrator
        .append_downtime_for_sites(&target, &entry, &args.sites, cancel)
        .await?;
    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    if ctx.json {
        print_json(&outcomes)?;
    } else {
        for outcome in &outcomes {
            match (&outcome.row, &outcome.error) {
                (Some(row), _) => println!("{}: appended at row {row}", outcome.site_code),
                (None, Some(err)) => println!("{}: failed: {err}", outcome.site_code),
                (None, None) => println!("{}: skipped", outcome.site_code),
            }
        }
    }
    if failed > 0 {
        return Err(sites_failed(failed, outcomes.len()));
    }
    Ok(())
}
