//! `sitewatch phases ...`

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use sitewatch_core::phase::NewPhase;
use tokio_util::sync::CancellationToken;

use crate::Context;
use crate::output::print_json;
use crate::output::table;

#[derive(Debug, Parser)]
pub struct PhasesCli {
    #[command(subcommand)]
    pub command: PhasesSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum PhasesSubcommand {
    /// Registered phases, oldest first.
    List,
    /// Register a spreadsheet as a new phase.
    Add(AddPhaseArgs),
    /// Unregister a phase by name or id. The spreadsheet is not touched.
    Remove(RemovePhaseArgs),
}

#[derive(Debug, Args)]
pub struct AddPhaseArgs {
    #[arg(long)]
    pub name: String,

    /// Sharing URL or bare spreadsheet id.
    #[arg(long)]
    pub link: String,

    /// Default tab for this phase.
    #[arg(long)]
    pub sheet: Option<String>,
}

#[derive(Debug, Args)]
pub struct RemovePhaseArgs {
    /// Phase name or id.
    pub phase: String,
}

impl PhasesCli {
    pub async fn run(&self, ctx: &Context, cancel: &CancellationToken) -> anyhow::Result<()> {
        let orchestrator = ctx.orchestrator()?;
        match &self.command {
            PhasesSubcommand::List => {
                let phases = orchestrator.phases(cancel).await?;
                if ctx.json {
                    return print_json(&phases);
                }
                if phases.is_empty() {
                    println!("No phases registered.");
                    return Ok(());
                }
                let rows: Vec<Vec<String>> = phases
                    .iter()
                    .map(|p| {
                        vec![
                            p.name.clone(),
                            p.default_tab_name.clone(),
                            p.spreadsheet_id.clone(),
                            p.created_at.format("%Y-%m-%d").to_string(),
                        ]
                    })
                    .collect();
                println!("{}", table(&["NAME", "TAB", "SPREADSHEET", "ADDED"], &rows));
            }
            PhasesSubcommand::Add(args) => {
                let new = NewPhase::new(&args.name, &args.link, args.sheet.as_deref())?;
                let phase = orchestrator.add_phase(new, cancel).await?;
                if ctx.json {
                    return print_json(&phase);
                }
                println!(
                    "Added phase '{}' ({}, tab '{}').",
                    phase.name, phase.spreadsheet_id, phase.default_tab_name
                );
            }
            PhasesSubcommand::Remove(args) => {
                let phase = orchestrator.remove_phase(&args.phase, cancel).await?;
                if ctx.json {
                    return print_json(&phase);
                }
                println!("Removed phase '{}'.", phase.name);
            }
        }
        Ok(())
    }
}
