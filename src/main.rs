use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fundval::cli::setup::setup;
use fundval::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fundval::AppCommand {
    fn from(cmd: Commands) -> fundval::AppCommand {
        match cmd {
            Commands::Estimate => fundval::AppCommand::Estimate,
            Commands::Metrics { window } => fundval::AppCommand::Metrics { window },
            Commands::SyncNav => fundval::AppCommand::SyncNav,
            Commands::Run => fundval::AppCommand::Run,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Estimate every fund's change right now
    Estimate,
    /// Display risk metrics over confirmed NAV history
    Metrics {
        /// Number of trailing NAV observations to use
        #[arg(short, long)]
        window: Option<usize>,
    },
    /// Fetch confirmed NAV history
    SyncNav,
    /// Value funds on a schedule during trading hours
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => fundval::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
