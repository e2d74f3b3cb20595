use anyhow::Result;
use clap::Parser;
use nodeforge::cli::Commands;
use nodeforge::{cli, commands};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize logging
    // Only use colors when outputting to a TTY (not when piped to a log file)
    let use_color = atty::is(atty::Stream::Stdout);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .with_ansi(use_color)
        .init();

    // Dispatch to appropriate command handler
    let result = match cli.cmd {
        Commands::Run(args) => commands::cmd_run(args).await,
        Commands::Infra(args) => commands::cmd_infra(args).await,
        Commands::Build(args) => commands::cmd_build(args).await,
        Commands::Upload(args) => commands::cmd_upload(args).await,
        Commands::Test(args) => commands::cmd_test(args).await,
        Commands::Preflight => commands::cmd_preflight().await,
    };

    // Handle errors
    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
