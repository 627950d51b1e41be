//! homewatch: debounced presence and intrusion detection runtime binary.
//! Evidence arrives as JSON lines; alerts leave as JSON lines on stdout.
//! Logs go to stderr.

use std::sync::Arc;

use clap::Parser;

mod cli;
mod config;
mod daemon;
mod dispatch;
mod input;
mod replay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("HOMEWATCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = config::AppConfig::load(args.config.as_deref())?;

    match args.command {
        cli::Command::Daemon(opts) => {
            tracing::info!("homewatch daemon starting");
            daemon::run_daemon(opts, config).await?;
        }
        cli::Command::Replay(opts) => {
            let mut config = config;
            if let Some(tick_ms) = opts.tick_ms {
                config.runtime.tick_ms = tick_ms;
                config.validate()?;
            }
            let dispatcher = Arc::new(dispatch::LogDispatcher::stdout());
            let summary = tokio::task::spawn_blocking(move || {
                replay::run_replay(&opts.file, &config, dispatcher)
            })
            .await??;
            if summary.skipped > 0 {
                tracing::warn!(skipped = summary.skipped, "some records were skipped");
            }
        }
        cli::Command::CheckConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
