//! tornet command-line interface
//!
//! Inspect and use a local Tor daemon: connection status, circuits and
//! streams, fetching URLs and opening raw tunnels through Tor.
//! Settings come from `TOR_*` environment variables, overridden by flags.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tornet_core::config::parse_node_list;
use tornet_core::TorConfig;
use tracing_subscriber::EnvFilter;

mod commands;

/// tornet - route traffic through a local Tor daemon
#[derive(Parser)]
#[command(name = "tornet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Tor control port
    #[arg(long)]
    control_port: Option<u16>,

    /// SOCKS5 proxy port
    #[arg(long)]
    socks_port: Option<u16>,

    /// Control port password
    #[arg(long)]
    password: Option<String>,

    /// Control port cookie file
    #[arg(long)]
    cookie_file: Option<String>,

    /// Comma-separated exit relay fingerprints or nicknames
    #[arg(long)]
    exit_nodes: Option<String>,

    /// Only ever use the given exit relays
    #[arg(long, requires = "exit_nodes")]
    strict_exit_nodes: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and show Tor status
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List circuits
    Circuits {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List streams
    Streams {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Fetch a URL through Tor
    Fetch {
        /// URL to fetch
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
    },

    /// Open a tunnel to host:port and close it again
    Tunnel {
        /// Destination host
        host: String,

        /// Destination port
        port: u16,
    },

    /// Request fresh circuits for new connections
    NewIdentity,

    /// Stay connected and print health checks until Ctrl+C
    Monitor,
}

impl Cli {
    fn config(&self) -> Result<TorConfig> {
        let mut config = TorConfig::from_env().context("Invalid TOR_* environment")?;

        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        if let Some(port) = self.socks_port {
            config.socks_port = port;
        }
        if let Some(password) = &self.password {
            config.control_password = Some(password.clone());
        }
        if let Some(path) = &self.cookie_file {
            config.control_cookie_path = Some(PathBuf::from(shellexpand::tilde(path).as_ref()));
        }
        if let Some(nodes) = &self.exit_nodes {
            config.custom_exit_nodes = Some(parse_node_list(nodes));
            config.strict_exit_nodes = self.strict_exit_nodes;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config()?;
    let command = cli.command.unwrap_or(Commands::Status { json: false });

    match command {
        Commands::Status { json } => commands::status(config, json).await?,
        Commands::Circuits { json } => commands::circuits(config, json).await?,
        Commands::Streams { json } => commands::streams(config, json).await?,
        Commands::Fetch { url, method } => commands::fetch(config, &method, &url).await?,
        Commands::Tunnel { host, port } => commands::tunnel(config, &host, port).await?,
        Commands::NewIdentity => commands::new_identity(config).await?,
        Commands::Monitor => commands::monitor(config).await?,
    }

    Ok(())
}
