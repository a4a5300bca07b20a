//! rebot - run the bot against a stanza gateway with an operator console.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;

use jabot::console;
use jabot_common::config::Config;
use jabot_common::config_loader::check_modular_files;
use jabot_common::logging::init_logging_with_exclusions;
use jabot_common::util::parse_duration_secs;

/// Presence-aware chat bot.
#[derive(Parser, Debug)]
#[command(name = "rebot")]
#[command(version)]
#[command(about = "Presence-aware chat bot with an operator console", long_about = None)]
struct Cli {
    /// Config directory (config.json + secrets.json) or a single config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Login address, e.g. bot@example.com
    #[arg(short, long)]
    username: Option<String>,

    /// Login password
    #[arg(short, long)]
    password: Option<String>,

    /// Stanza gateway WebSocket URL
    #[arg(long)]
    gateway: Option<String>,

    /// Loop budget such as 30s or 5m; 0 runs until the session ends
    #[arg(long, default_value = "0")]
    budget: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective configuration (without secrets) and exit
    #[arg(long)]
    save_config: bool,
}

fn save_config(cli: &Cli, config: &Config) -> Result<()> {
    let public = config.without_secrets();
    match &cli.config {
        Some(path) if path.is_dir() => public.save_to(&path.join("config.json"))?,
        Some(path) => public.save_to(path)?,
        None => public.save()?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) if path.is_dir() => Config::load_dir(path)?,
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides();

    if let Some(username) = &cli.username {
        config.account.jid.clone_from(username);
    }
    if let Some(password) = &cli.password {
        config.account.password.clone_from(password);
    }
    if let Some(gateway) = &cli.gateway {
        config.gateway.url.clone_from(gateway);
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level.clone_from(level);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );
    tracing::info!("rebot v{}", env!("CARGO_PKG_VERSION"));
    for (file, present) in check_modular_files(cli.config.clone().filter(|p| p.is_dir())) {
        tracing::debug!(file = %file, present, "Config file");
    }

    config.validate()?;
    if cli.save_config {
        save_config(&cli, &config)?;
        tracing::info!("Configuration saved");
        return Ok(());
    }
    config.require_credentials()?;
    let budget = parse_duration_secs(&cli.budget)
        .map(Duration::from_secs)
        .map_err(anyhow::Error::msg)
        .context("Invalid --budget")?;

    let mut bot = jabot::build_bot(&config);
    bot.connect().await.context("Failed to connect")?;
    let handle = bot.handle();

    let console_task = tokio::spawn(console::run(
        handle.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, closing session");
            let _ = signal_handle.close();
        }
    });

    let result = tokio::spawn(async move { bot.run_loop(budget).await }).await?;
    console_task.abort();

    match result {
        Ok(()) => {
            tracing::info!("Session ended");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Session failed");
            Err(e.into())
        }
    }
}
