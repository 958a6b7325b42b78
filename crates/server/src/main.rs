mod bootstrap;
mod shutdown;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use greeter_core::config::{AppConfig, ConfigOverrides, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "greeter",
    about = "Slack Socket Mode greeter bot",
    long_about = "Connects to Slack over Socket Mode and answers app mentions and /hello with a greeting.",
    after_help = "Environment:\n  SLACK_APP_TOKEN  app-level token (xapp-...)\n  SLACK_BOT_TOKEN  bot token (xoxb-...)"
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Read settings from this TOML file")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "LEVEL", help = "Override the log level (trace|debug|info|warn|error)")]
    log_level: Option<String>,
}

impl Cli {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides { log_level: self.log_level, ..ConfigOverrides::default() },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use greeter_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(true).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(true).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(true).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    // Config errors surface before logging or any network call.
    let config = AppConfig::load(cli.load_options())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;
    let shutdown = shutdown::spawn_signal_listener();

    let dispatch = tokio::spawn(app.dispatch_loop.run(shutdown.clone()));

    tracing::info!(
        event_name = "system.server.started",
        log_level = %app.config.logging.level,
        log_format = ?app.config.logging.format,
        event_buffer = app.config.socket.event_buffer,
        "greeter started"
    );
    if let Err(error) = app.slack_runner.run(shutdown).await {
        tracing::error!(
            event_name = "system.server.fatal",
            error = %error,
            "socket mode connection failed permanently"
        );
        dispatch.abort();
        return Err(error.into());
    }

    let summary = dispatch.await?;
    tracing::info!(
        event_name = "system.server.stopped",
        processed = summary.processed,
        replies = summary.replies,
        "greeter stopped"
    );

    Ok(())
}
