use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ptychat_core::config::{Command, Config, Settings};

mod commands;
mod console;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings: file, then environment, then CLI
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_env();
    settings.merge_cli(&cli);
    settings.validate();

    match cli.command.unwrap_or(Command::Run { json: false }) {
        Command::Run { json } => commands::run_chat(settings, json).await,
        Command::Locate { .. } => commands::run_locate(settings).await,
        Command::Tail { path, .. } => commands::run_tail(settings, path).await,
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("ptychat=debug,ptychat_core=debug")
    } else {
        EnvFilter::new("ptychat=info,ptychat_core=info")
    };

    // stdout carries events; logs go to stderr
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
