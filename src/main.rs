//! Fixloop CLI entry point.

use clap::Parser;

use fixloop::cli::commands::{self, load_config, AppContext};
use fixloop::cli::{Cli, Commands};
use fixloop::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => fixloop::cli::handle_error(err, cli.json),
    };

    // Held until exit so buffered file logs are flushed.
    let _logger = match LogConfig::try_from(&config.logging).and_then(|c| LoggerImpl::init(&c)) {
        Ok(logger) => logger,
        Err(err) => fixloop::cli::handle_error(err, cli.json),
    };

    let ctx = match AppContext::open(config).await {
        Ok(ctx) => ctx,
        Err(err) => fixloop::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Thresholds(args) => commands::thresholds::execute(args, &ctx, cli.json).await,
        Commands::Metrics(args) => commands::metrics::execute(args, &ctx, cli.json).await,
        Commands::Runs(args) => commands::runs::execute(args, &ctx, cli.json).await,
    };

    if let Err(err) = result {
        fixloop::cli::handle_error(err, cli.json);
    }
}
