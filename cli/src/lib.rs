//! `sitewatch` command-line front end.
//!
//! Reads go through the API key; every write asks for a delegated token the
//! first time it is needed in a process.

pub mod billing_cmd;
pub mod output;
pub mod phase_cmd;
pub mod sheet_cmd;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use anyhow::anyhow;
use clap::Parser;
use clap::Subcommand;
use sitewatch_core::ConfigLoader;
use sitewatch_core::FilePhaseRegistry;
use sitewatch_core::Orchestrator;
use sitewatch_core::SheetsError;
use sitewatch_core::SitewatchConfig;
use sitewatch_core::config::ConfigError;
use tokio_util::sync::CancellationToken;

use crate::billing_cmd::BillingArgs;
use crate::phase_cmd::PhasesCli;
use crate::sheet_cmd::AddDowntimeArgs;
use crate::sheet_cmd::EscalateArgs;
use crate::sheet_cmd::EscalationsArgs;
use crate::sheet_cmd::PhaseArg;
use crate::sheet_cmd::RecordsArgs;
use crate::sheet_cmd::SetEndArgs;
use crate::sheet_cmd::TabArgs;

/// Exit status for bad arguments, input or configuration.
pub const EXIT_USAGE: u8 = 2;
/// Exit status after Ctrl-C.
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "sitewatch", version, about = "Site downtime and escalation tracking over shared sheets")]
pub struct Cli {
    /// Configuration file (defaults to ./sitewatch.toml, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage registered phases.
    Phases(PhasesCli),
    /// List the tabs of a phase's spreadsheet.
    Tabs(PhaseArg),
    /// Downtime records with computed durations.
    Records(RecordsArgs),
    /// Records that started but were never restored.
    NoUptime(TabArgs),
    /// Records missing a cause or an action plan.
    Escalations(EscalationsArgs),
    /// Row the next downtime entry would be written to.
    NextRow(TabArgs),
    /// Close open downtime by writing its end time.
    SetEnd(SetEndArgs),
    /// Fill cause and/or action plan on escalation records.
    Escalate(EscalateArgs),
    /// Append a downtime entry for one or more sites.
    AddDowntime(AddDowntimeArgs),
    /// Due status and monthly summary of billing accounts.
    Billing(BillingArgs),
}

/// Loaded configuration plus global flags.
pub struct Context {
    pub config: SitewatchConfig,
    pub json: bool,
}

impl Context {
    pub fn load(config_path: Option<&Path>, json: bool) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::new().with_file(path).load()?,
            None => ConfigLoader::load_default()?,
        };
        Ok(Self { config, json })
    }

    pub fn registry(&self) -> anyhow::Result<Arc<FilePhaseRegistry>> {
        let path = self
            .config
            .phases_file
            .clone()
            .or_else(FilePhaseRegistry::default_path)
            .ok_or(ConfigError::MissingField("phases_file"))?;
        Ok(Arc::new(FilePhaseRegistry::new(path)))
    }

    /// Orchestrator for phase management; no API key needed.
    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        Ok(Orchestrator::from_config(&self.config, self.registry()?)?)
    }

    /// Orchestrator for commands that read sheets.
    pub fn sheets(&self) -> anyhow::Result<Orchestrator> {
        self.config.require_api_key()?;
        self.orchestrator()
    }
}

pub async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let ctx = Context::load(cli.config.as_deref(), cli.json).context("loading configuration")?;
    match cli.command {
        Command::Phases(phases) => phases.run(&ctx, &cancel).await,
        Command::Billing(args) => billing_cmd::run(&ctx, &args),
        Command::Tabs(args) => sheet_cmd::tabs(&ctx, &args, &cancel).await,
        Command::Records(args) => sheet_cmd::records(&ctx, &args, &cancel).await,
        Command::NoUptime(args) => sheet_cmd::no_uptime(&ctx, &args, &cancel).await,
        Command::Escalations(args) => sheet_cmd::escalations(&ctx, &args, &cancel).await,
        Command::NextRow(args) => sheet_cmd::next_row(&ctx, &args, &cancel).await,
        Command::SetEnd(args) => sheet_cmd::set_end(&ctx, &args, &cancel).await,
        Command::Escalate(args) => sheet_cmd::escalate(&ctx, &args, &cancel).await,
        Command::AddDowntime(args) => sheet_cmd::add_downtime(&ctx, &args, &cancel).await,
    }
}

/// Process exit status for a failed command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<SheetsError>() {
            return match err {
                SheetsError::Cancelled => EXIT_CANCELLED,
                SheetsError::InvalidInput(_) | SheetsError::Config(_) => EXIT_USAGE,
                _ => 1,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_USAGE;
        }
    }
    1
}

/// Error for a partially applied multi-site append.
pub(crate) fn sites_failed(failed: usize, total: usize) -> anyhow::Error {
    anyhow!("{failed} of {total} site(s) could not be appended")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes_follow_the_error_kind() {
        let cancelled = anyhow::Error::from(SheetsError::Cancelled);
        let invalid = anyhow::Error::from(SheetsError::InvalidInput("x".to_string()))
            .context("adding downtime");
        let config = anyhow::Error::from(ConfigError::MissingField("api_key"));
        let upstream = anyhow::Error::from(SheetsError::Upstream {
            status: 500,
            message: "boom".to_string(),
        });

        assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);
        assert_eq!(exit_code(&invalid), EXIT_USAGE);
        assert_eq!(exit_code(&config), EXIT_USAGE);
        assert_eq!(exit_code(&upstream), 1);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sitewatch", "no-uptime", "--phase", "P1", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Command::NoUptime(args) => assert_eq!(args.phase.as_deref(), Some("P1")),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
