//! twrs - TWSE relative-strength monitor.
//!
//! Ranks listed securities by relative strength from the exchange's
//! end-of-day file and pushes leaderboards and summaries to a chat bot.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use twrs_common::config::Config;
use twrs_common::logging::init_logging;

mod cli;
mod render;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let (message, code) = match e.downcast_ref::<twrs_common::Error>() {
                Some(err) => (err.user_message(), err.exit_code()),
                None => (format!("{:#}", e), 1),
            };
            eprintln!("{} {}", style("✗").red().bold(), message);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // `config init` may point at a file that does not exist yet
    let config = match (&cli.command, cli.config.as_deref()) {
        (Commands::Config { .. }, Some(path)) if !path.exists() => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
        (_, path) => Config::load_with_env(path)?,
    };

    // One-shot commands keep stderr quiet unless asked
    let level = if cli.verbose || matches!(cli.command, Commands::Run) {
        config.observability.log_level.as_str()
    } else {
        "warn"
    };
    init_logging(level, &config.observability.log_format);

    tracing::info!("twrs v{}", env!("CARGO_PKG_VERSION"));

    cli::execute(cli, config).await
}
