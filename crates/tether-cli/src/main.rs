//! tether: failover controller for a primary/secondary database pair.
//!
//! Every participant runs the same binary with its own config file:
//!
//! ```bash
//! # On each database node and on the monitor
//! tether /etc/tether/tether.toml
//!
//! # Validate a config and print the effective settings
//! tether --check /etc/tether/tether.toml
//! ```
//!
//! Signals: SIGINT, SIGTERM and SIGQUIT stop the database and exit once it is
//! down (a second one exits immediately); SIGUSR1 logs diagnostics.

mod signals;
mod supervisor;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tether_config::ConfigLoader;

/// tether - keeps exactly one writable database in a two-node cluster.
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,

    /// Validate the configuration, print the effective settings and exit.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ConfigLoader::new(&cli.config)
        .with_env_prefix("TETHER")
        .load()
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    if cli.check {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tether")
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(supervisor::run(config))
}
