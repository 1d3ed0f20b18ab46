//! Command-line host for the Knot offline caching worker.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the app shell and activate the current generation
//! knot-agent install --attempts 5
//!
//! # Resolve a request the way a controlled page would
//! knot-agent fetch http://localhost:8080/index.html
//!
//! # Prefetch media into the current generation
//! knot-agent cache-media https://cdn.example/a.png https://cdn.example/b.mp4
//!
//! # Inspect the store
//! knot-agent generations
//! knot-agent entries
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use knot_common::{init_logging, LogConfig, RetryConfig};
use knot_net::Request;
use knot_sw::{ControlMessage, WorkerConfig};
use serde_json::json;
use tracing::debug;
use url::Url;

mod agent;

use agent::{resolve_data_dir, Agent};

#[derive(Parser)]
#[command(name = "knot-agent", version)]
#[command(about = "Offline caching agent for the Knot app")]
struct Cli {
    /// Worker configuration file (JSON). Built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cache store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the app resources and activate the current generation
    Install {
        /// Attempts before giving up
        #[arg(short, long, default_value = "3")]
        attempts: u32,
    },

    /// Resolve a request through the worker
    Fetch {
        /// Request URL
        url: String,
        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
    },

    /// Prefetch media URLs into the current generation
    CacheMedia {
        /// Absolute media URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// List cache generations
    Generations,

    /// List entries in the current generation
    Entries,

    /// Print the effective worker configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_args(&cli.log_level, &cli.log_format)?)?;

    let config = match &cli.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let data_dir = resolve_data_dir(cli.data_dir.as_deref(), &config.origin)?;
    debug!(data_dir = %data_dir.display(), "Using data directory");
    let mut agent = Agent::open(config, &data_dir).await?;

    match cli.command {
        Commands::Install { attempts } => {
            let state = agent.install(&RetryConfig::with_attempts(attempts)).await?;
            println!(
                "{}: {:?} ({} entries)",
                agent.config.cache_name,
                state,
                agent.storage.handle(&agent.config.cache_name).len()?
            );
        }

        Commands::Fetch { url, method } => {
            let url = Url::parse(&url).with_context(|| format!("Invalid URL: {url}"))?;
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("Invalid method: {method}"))?;

            let response = agent.host.fetch(Request::new(method, url)).await?;
            println!("{} {}", response.status, response.status_text);
            println!(
                "type: {}, {} bytes",
                response.response_type.as_str(),
                response.body.len()
            );
        }

        Commands::CacheMedia { urls } => {
            if !agent.is_active().await {
                bail!("Worker is not installed; run `knot-agent install` first");
            }
            let message = json!({ "type": "CACHE_MEDIA", "urls": urls });
            if ControlMessage::parse(&message).is_none() {
                bail!("No usable media URLs");
            }
            agent.host.post_message(message).await?;

            let cache = agent.storage.handle(&agent.config.cache_name);
            let mut cached = 0;
            for raw in &urls {
                if let Ok(url) = Url::parse(raw) {
                    if cache.match_url(&url)?.is_some() {
                        cached += 1;
                    }
                }
            }
            println!("cached {cached} of {}", urls.len());
        }

        Commands::Generations => {
            for name in agent.storage.keys()? {
                let marker = if name == agent.config.cache_name { "*" } else { " " };
                println!("{marker} {name}");
            }
        }

        Commands::Entries => {
            let cache = agent.storage.handle(&agent.config.cache_name);
            if !agent.storage.has(cache.name())? {
                bail!("Generation {} does not exist", cache.name());
            }
            for key in cache.keys()? {
                println!("{key}");
            }
        }

        // Printed before the store is opened.
        Commands::Config => {}
    }

    Ok(())
}
