// ============================================
// File: crates/mixnet-node/src/main.rs
// ============================================
//! # Mixnet Node Entry Point
//!
//! ## Creation Reason
//! Main entry point for the mixnet node binary.
//! Handles CLI parsing, logging setup, key generation and node startup.
//!
//! ## Usage
//! ```bash
//! # Generate keys and hand the public halves to neighbouring operators
//! mixnet-node keygen --out /etc/mixnet/mix.json
//! mixnet-node pubkey --key-file /etc/mixnet/mix.json
//!
//! # Check and run
//! mixnet-node validate --config /etc/mixnet/node.toml
//! mixnet-node run --config /etc/mixnet/node.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` overrides `[logging].level`
//! - `keygen` refuses to overwrite an existing key file
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mixnet_node::{KeyFile, Node, NodeConfig, NodeKeys, NodeRole};

// ============================================
// CLI Definition
// ============================================

/// Layered-encryption UDP mix network node
#[derive(Parser, Debug)]
#[command(name = "mixnet-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/mixnet/node.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/mixnet/node.toml")]
        config: PathBuf,
    },

    /// Generate onion and link key pairs
    Keygen {
        /// Where to write the JSON key file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print the public keys of a key file
    Pubkey {
        /// Path to the JSON key file
        #[arg(short, long)]
        key_file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = KeyFormat::Base64)]
        format: KeyFormat,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KeyFormat {
    Base64,
    Hex,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging("info");

    let result = match cli.command {
        Commands::Run { config } => cmd_run(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::Keygen { out } => cmd_keygen(out).await,
        Commands::Pubkey { key_file, format } => cmd_pubkey(key_file, format).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Loads configuration and keys, then runs until Ctrl+C.
async fn cmd_run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = NodeConfig::load(&config_path).await?;

    init_logging(&config.logging.level);

    let keys = NodeKeys::load(&config.keys)
        .await
        .context("failed to load node keys")?;

    info!("════════════════════════════════════════");
    info!("Role:       {}", config.role());
    info!("Listen:     {}", config.listen_addr());
    if let Some(next) = config.hops.next {
        info!("Next hop:   {}", next);
    }
    match config.hops.previous {
        Some(previous) => info!("Prev hop:   {}", previous),
        None if config.role() != NodeRole::Entry => info!("Prev hop:   learned from traffic"),
        None => {}
    }
    info!("════════════════════════════════════════");

    Node::new(config, keys).run().await?;
    Ok(())
}

/// Validates a configuration file and prints a summary.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = NodeConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Node:");
    println!("   Role:       {}", config.role());
    println!("   Listen:     {}", config.listen_addr());
    println!();
    println!("Hops:");
    match config.hops.previous {
        Some(previous) => println!("   Previous:   {previous}"),
        None => println!("   Previous:   (learned)"),
    }
    if let Some(next) = config.hops.next {
        println!("   Next:       {next}");
    }
    if config.role() == NodeRole::Entry {
        println!("   Path:       {} hops", config.keys.hop_public_keys.len());
    }
    println!();
    println!("Mixing:");
    println!("   Requests:   batches of {}", config.mixing.request_threshold);
    println!("   Responses:  batches of {}", config.mixing.response_threshold);
    println!("   Cipher:     {}", config.mixing.channel_cipher);
    println!();
    println!("Limits:");
    println!("   Max Channels:     {}", config.limits.max_channels);
    println!("   Channel Timeout:  {}s", config.limits.channel_timeout_secs);
    match config.role() {
        NodeRole::Exit => {
            println!();
            println!("Exit:");
            println!(
                "   Ports:      {}..={} on {}",
                config.exit.port_range_low, config.exit.port_range_high, config.exit.bind_ip
            );
        }
        NodeRole::Terminal => {
            println!();
            println!("Terminal:");
            println!("   Endpoint:   {}", config.exit.terminal_addr);
        }
        NodeRole::Entry | NodeRole::Mix => {}
    }
    println!();

    Ok(())
}

/// Writes a fresh key file.
async fn cmd_keygen(out: PathBuf) -> anyhow::Result<()> {
    if out.exists() {
        bail!("{} already exists; remove it first", out.display());
    }

    let file = KeyFile::generate();
    file.save(&out).await?;

    println!("✅ Keys written to {}", out.display());
    println!();
    println!("   Onion public key:  {}", file.onion_public);
    println!("   Link public key:   {}", file.link_public);
    println!();
    println!("Give the onion key to entry operators (keys.hop_public_keys)");
    println!("and the link key to your neighbours (keys.*_link_key).");
    Ok(())
}

/// Prints the public halves of a key file.
async fn cmd_pubkey(key_file: PathBuf, format: KeyFormat) -> anyhow::Result<()> {
    let file = KeyFile::load(&key_file).await?;
    let onion = file.onion_key_pair()?;
    let link = file.link_key_pair()?;

    match format {
        KeyFormat::Base64 => {
            println!("onion {}", onion.public_key());
            println!("link  {}", link.public_key());
        }
        KeyFormat::Hex => {
            println!("onion {}", hex::encode(onion.public_key().as_bytes()));
            println!("link  {}", hex::encode(link.public_key().as_bytes()));
        }
    }
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
