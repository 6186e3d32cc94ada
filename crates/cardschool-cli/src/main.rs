//! cardschool: a Webex bot that walks spaces through a series of lesson cards
//!
//! Usage:
//!   cardschool init             write a starter config to ~/.cardschool/config.toml
//!   cardschool check            validate the config and the lesson files
//!   cardschool start            run the webhook server

mod server;

use anyhow::{Context, Result, bail};
use cardschool_core::config::{self, DEFAULT_CONFIG_TEMPLATE};
use cardschool_core::{Config, LessonCatalog};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cardschool",
    about = "Webex bot that teaches buttons and cards through a series of lessons",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.cardschool/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive, e.g. "debug" or "cardschool_core=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Start,
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the config and lesson files, then exit
    Check,
}

/// RUST_LOG wins, then --log-level, then the config's log_level
fn log_filter(cli_level: Option<&str>, config_level: Option<&str>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = cli_level.or(config_level).unwrap_or("info");
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {:?}", path))?;
    println!("Wrote {}", path.display());
    println!("Set bot.token (or TOKEN) and run `cardschool check`");
    Ok(())
}

fn cmd_check(config: &Config) -> Result<()> {
    config.validate()?;
    let catalog = LessonCatalog::load(&config.lessons.dir)
        .with_context(|| format!("Failed to load lessons from {:?}", config.lessons.dir))?;

    println!("Lessons ({}):", config.lessons.dir.display());
    for lesson in catalog.iter() {
        println!("  {:>2}  {}", lesson.index, lesson.title());
    }
    if config.gate.enabled {
        println!(
            "Gating: on, {} allowed users, last valid user leaving -> {:?}",
            config.gate.allowed_users.len(),
            config.gate.on_last_valid_user_left
        );
    } else {
        println!("Gating: off");
    }
    println!("Store: {:?}", config.store.backend);
    match (&config.admin.room_id, &config.admin.email) {
        (Some(room), _) => println!("Admin notifications: room {}", room),
        (None, Some(email)) => println!("Admin notifications: {}", email),
        (None, None) => println!("Admin notifications: none"),
    }
    println!(
        "Webhook: {}",
        config.server.webhook_url.as_deref().unwrap_or("not registered by the bot")
    );
    Ok(())
}

async fn cmd_start(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Shutting down");
        on_signal.cancel();
    });
    server::run(config, cancel).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_tracing(log_filter(cli.log_level.as_deref(), None));
        let path = cli.config.unwrap_or_else(config::default_config_path);
        return cmd_init(&path, force);
    }

    let config = Config::load(cli.config.as_deref())?;
    init_tracing(log_filter(
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
    ));

    match cli.command {
        Commands::Start => cmd_start(config).await,
        Commands::Check => cmd_check(&config),
        Commands::Init { .. } => Ok(()),
    }
}
