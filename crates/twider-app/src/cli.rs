//! CLI argument definitions for the Twider search service.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Twider - hybrid dense/sparse search over a stream of posts.
#[derive(Parser, Debug)]
#[command(name = "twider", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Consume post events and serve the search API (default).
    Serve,
    /// Create the vector collection if it does not exist, then exit.
    InitCollection,
    /// Run a single hybrid search and print the results as JSON.
    Search {
        /// Query text.
        query: String,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 15)]
        limit: i64,
    },
}

impl CliArgs {
    /// The subcommand to run; `serve` when none is given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > TWIDER_CONFIG env var > `twider.toml`.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("TWIDER_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("twider.toml")
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > TWIDER_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("TWIDER_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        config_port
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > TWIDER_LOG_LEVEL env var > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(level) = std::env::var("TWIDER_LOG_LEVEL") {
            if !level.trim().is_empty() {
                return level;
            }
        }
        config_level.to_string()
    }

    /// NATS server URL override from TWIDER_NATS_URL.
    pub fn resolve_stream_url(&self, config_url: &str) -> String {
        std::env::var("TWIDER_NATS_URL").unwrap_or_else(|_| config_url.to_string())
    }

    /// Qdrant URL override from TWIDER_QDRANT_URL.
    pub fn resolve_index_url(&self, config_url: &str) -> String {
        std::env::var("TWIDER_QDRANT_URL").unwrap_or_else(|_| config_url.to_string())
    }
}
