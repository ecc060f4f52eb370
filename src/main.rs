#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::struct_excessive_bools,
    clippy::too_many_lines
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};
use waclaw::config::{Config, Mode};
use waclaw::daemon;

/// `waclaw` - a headless WhatsApp agent with a local HTTP control plane.
#[derive(Parser, Debug)]
#[command(name = "waclaw")]
#[command(version)]
#[command(about = "Headless WhatsApp agent: send commands over HTTP or stdin, receive messages as JSON.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.waclaw/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Force debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Credential store dialect
    #[arg(long, global = true)]
    db_dialect: Option<String>,

    /// Credential store address
    #[arg(long, global = true)]
    db_address: Option<String>,

    /// Ask the phone for full history on first pairing
    #[arg(long, global = true)]
    request_full_sync: bool,

    /// Control-plane and delivery port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Active surfaces: none, send or both
    #[arg(long, global = true)]
    mode: Option<String>,

    /// Download inbound media and deliver it as media records
    #[arg(long, global = true)]
    save_media: bool,

    /// Delete produced media files shortly after delivery
    #[arg(long, global = true)]
    auto_delete_media: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent. With a command, run it once and exit.
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print the last health snapshot written by a running agent
    Status,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = Config::load_or_init_at(path)?;
                config.apply_env_overrides();
                config
            }
            None => Config::load_or_init()?,
        };
        self.apply_to(&mut config)?;
        Ok(config)
    }

    fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(dialect) = &self.db_dialect {
            config.database.dialect.clone_from(dialect);
        }
        if let Some(address) = &self.db_address {
            config.database.address.clone_from(address);
        }
        if self.request_full_sync {
            config.sync.request_full_sync = true;
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if let Some(mode) = &self.mode {
            config.mode = mode.parse::<Mode>()?;
        }
        if self.save_media {
            config.media.save_media = true;
        }
        if self.auto_delete_media {
            config.media.auto_delete = true;
        }
        Ok(())
    }
}

/// `--debug` wins, then `RUST_LOG`, then the configured level.
fn init_logging(config: &Config) {
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
        })
    };
    let subscriber = fmt::Subscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install log subscriber: {e}");
    }
}

fn print_status(config: &Config) -> Result<()> {
    let path = daemon::state_file_path(config);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("No daemon state at {} (is waclaw running?)", path.display()))?;
    println!("{raw}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config);

    match cli.command {
        Some(Command::Status) => print_status(&config),
        Some(Command::Run { command }) => {
            let code = daemon::run(config, command).await?;
            std::process::exit(code);
        }
        None => {
            let code = daemon::run(config, Vec::new()).await?;
            std::process::exit(code);
        }
    }
}
