use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use choicelab::config::Config;
use choicelab::export::CsvLayout;
use choicelab::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "choicelab")]
#[command(version, about = "Multi-phase risky-choice experiment runner")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    /// Write log lines as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Data directory. Defaults to ./.choicelab
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory with default configuration and phase table
    Init,
    /// Run a participant session, resuming the saved one if present
    Run {
        /// Seed the outcome sampler for a reproducible session
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show the saved session
    Status,
    /// List the phase table in effect
    Phases,
    /// Export the saved session's dataset
    Export {
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// CSV column layout
        #[arg(long, value_enum, default_value_t = LayoutArg::Full)]
        layout: LayoutArg,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload the saved session's dataset, saving it locally on failure
    Upload,
    /// Discard the saved session
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    /// Columns sent to the storage provider
    Upload,
    /// Every trial field, including the sampled outcome
    Full,
}

impl From<LayoutArg> for CsvLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Upload => CsvLayout::Upload,
            LayoutArg::Full => CsvLayout::Full,
        }
    }
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default choicelab.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::new(cli.data_dir.clone(), cli.verbose)?;
    let _log_guard = logging::init(&config.log_dir, cli.verbose, cli.log_json)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Run { seed } => cmd::cmd_run(&cli, &config, *seed).await?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Phases => cmd::cmd_phases(&config)?,
        Commands::Export {
            format,
            layout,
            output,
        } => cmd::cmd_export(&config, *format, (*layout).into(), output.as_deref())?,
        Commands::Upload => cmd::cmd_upload(&config).await?,
        Commands::Reset { force } => cmd::cmd_reset(&config, *force || cli.yes)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
