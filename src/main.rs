mod cli;
mod core;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::output::OutputOptions;
use crate::cli::report_cmd::ReportView;
use crate::core::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "ledgerlens",
    about = "Billing ledger sync and prompt-cache cost analytics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Shorthand for JSON output
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the ledger and show spend and cache reports
    Report {
        /// Analysis window in days (default: ledger.window_days)
        #[arg(short, long)]
        days: Option<u32>,

        /// Only the prompt-cache report
        #[arg(long, conflicts_with = "cost")]
        cache: bool,

        /// Only the spend and model-substitution report
        #[arg(long)]
        cost: bool,
    },
    /// Refresh the local ledger snapshot
    Sync {
        /// Window to keep in days (default: ledger.window_days)
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate default config file
    Init,
    /// Validate config file
    Check,
    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ledgerlens=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config unreadable, using defaults");
        AppConfig::default()
    });
    let output_opts = OutputOptions::resolve(
        cli.json,
        cli.pretty,
        cli.no_color,
        cli.verbose,
        &config.settings,
    );

    match cli.command {
        None => cli::report_cmd::run(None, ReportView::All, &config, &output_opts).await?,
        Some(Commands::Report { days, cache, cost }) => {
            let view = match (cache, cost) {
                (true, _) => ReportView::Cache,
                (_, true) => ReportView::Cost,
                _ => ReportView::All,
            };
            cli::report_cmd::run(days, view, &config, &output_opts).await?;
        }
        Some(Commands::Sync { days }) => cli::report_cmd::sync(days, &config, &output_opts).await?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&output_opts)?,
            ConfigAction::Path => cli::config_cmd::path(&output_opts)?,
        },
    }

    Ok(())
}
