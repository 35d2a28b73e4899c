use clap::{Parser, Subcommand};
use sensestream::cli::run::RunArgs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sensestream")]
#[command(about = "Stream Sense HAT telemetry into Snowflake", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "sensestream=debug"
    } else {
        "sensestream=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = sensestream::config::resolve_config_path(cli.config.as_deref());

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Some(Commands::Run(args)) => sensestream::cli::run::run(config_path, args)
            .await
            .map(|_| ())
            .map_err(Into::into),
        // Default behavior is to run
        None => sensestream::cli::run::run(config_path, RunArgs::default())
            .await
            .map(|_| ())
            .map_err(Into::into),
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => sensestream::cli::config::init(stdout),
        },
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Fatal error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
