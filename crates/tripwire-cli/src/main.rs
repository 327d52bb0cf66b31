//! Tripwire CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(author, version, about = "Build-change triggered task dispatcher", long_about = None)]
struct Cli {
    /// Trigger configuration file
    #[arg(short, long, global = true, default_value = "trigger.yaml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tripwire=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.json);
    tripwire_scheduler::scheduler::install_panic_logging();

    match cli.command {
        Commands::Run {
            skip_first_query,
            skip_queue_reset,
        } => handlers::run(&cli.config, skip_first_query, skip_queue_reset).await?,
        Commands::Reset { job, mode } => handlers::reset(&cli.config, &job, mode).await?,
        Commands::Validate => handlers::validate(&cli.config)?,
        Commands::Status { run_id } => handlers::status(&cli.config, run_id).await?,
    }

    Ok(())
}
