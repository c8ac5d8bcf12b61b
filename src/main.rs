use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use psdcalc::cli::balance::{BalanceOptions, OutputFormat};
use psdcalc::core::log::init_logging;
use psdcalc::core::{Adjustments, MarketYear};
use std::path::PathBuf;

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

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// List commodities and their codes
    Commodities {
        /// Only show names containing this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// List countries and their codes
    Countries {
        /// Only show names containing this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// List attribute names and IDs
    Attributes,
    /// Fetch a supply and demand balance and recompute its totals
    Balance(BalanceArgs),
    /// Clear cached commodity, country and attribute lists
    Refresh,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Csv,
}

#[derive(Args)]
struct BalanceArgs {
    /// Commodity name or code, e.g. "Wheat"
    #[arg(long)]
    commodity: String,

    /// Country name or code, e.g. "United States"
    #[arg(long)]
    country: String,

    /// Market year (1990-2030), defaults to the configured year
    #[arg(short, long)]
    year: Option<MarketYear>,

    /// Override production
    #[arg(long)]
    production: Option<f64>,

    /// Override imports
    #[arg(long)]
    imports: Option<f64>,

    /// Override feed domestic consumption
    #[arg(long)]
    feed_dom_consumption: Option<f64>,

    /// Override food, seed and industrial consumption
    #[arg(long)]
    fsi_consumption: Option<f64>,

    /// Override exports
    #[arg(long)]
    exports: Option<f64>,

    /// Prompt for adjustments after fetching
    #[arg(short, long)]
    interactive: bool,

    /// Also write the balance as CSV to this file or directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format for stdout
    #[arg(long, value_enum, default_value_t = Format::Table)]
    format: Format,
}

impl From<BalanceArgs> for BalanceOptions {
    fn from(args: BalanceArgs) -> BalanceOptions {
        BalanceOptions {
            commodity: args.commodity,
            country: args.country,
            year: args.year,
            adjustments: Adjustments {
                production: args.production,
                imports: args.imports,
                feed_dom_consumption: args.feed_dom_consumption,
                fsi_consumption: args.fsi_consumption,
                exports: args.exports,
            },
            interactive: args.interactive,
            output: args.output,
            format: match args.format {
                Format::Table => OutputFormat::Table,
                Format::Csv => OutputFormat::Csv,
            },
        }
    }
}

impl From<Commands> for psdcalc::AppCommand {
    fn from(cmd: Commands) -> psdcalc::AppCommand {
        match cmd {
            Commands::Commodities { filter } => psdcalc::AppCommand::Commodities { filter },
            Commands::Countries { filter } => psdcalc::AppCommand::Countries { filter },
            Commands::Attributes => psdcalc::AppCommand::Attributes,
            Commands::Balance(args) => psdcalc::AppCommand::Balance(args.into()),
            Commands::Refresh => psdcalc::AppCommand::Refresh,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => psdcalc::cli::setup::setup_at_path(path),
            None => psdcalc::cli::setup::setup(),
        },
        Some(cmd) => psdcalc::run_command(cmd.into(), cli.config_path.as_deref()).await,
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
