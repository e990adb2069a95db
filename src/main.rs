//! layerfs - mount a writable overlay on top of a read-only tree
//!
//! Usage:
//!   layerfs <root> <overlay> <mountpoint> [options]

use anyhow::Context;
use clap::Parser;
use layerfs::config::{Config, MountConfig};
use std::path::{Path, PathBuf};
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "layerfs")]
#[command(author = "layerfs Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Overlay a writable directory on top of a read-only one")]
struct Cli {
    /// Read-only base directory
    root: PathBuf,

    /// Writable overlay directory receiving every change
    overlay: PathBuf,

    /// Mount point directory
    mountpoint: PathBuf,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    auto_unmount: bool,

    /// Filesystem name shown in the mount table
    #[arg(long)]
    fs_name: Option<String>,

    /// Kernel attribute cache TTL in seconds
    #[arg(long)]
    attr_ttl: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let builder = FmtSubscriber::builder().with_target(false);
    let installed = if cli.verbose {
        tracing::subscriber::set_global_default(builder.with_max_level(Level::DEBUG).finish())
    } else {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())
    };
    if let Err(e) = installed {
        eprintln!("Failed to set subscriber: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = build_config(&cli);
    config.apply_env_overrides();

    // Flags given on the command line beat the environment
    if cli.allow_other {
        config.options.allow_other = true;
    }
    if cli.auto_unmount {
        config.options.auto_unmount = true;
    }
    if let Some(name) = cli.fs_name {
        config.options.fs_name = name;
    }
    if let Some(ttl) = cli.attr_ttl {
        config.options.attr_ttl_secs = ttl;
    }

    if cli.print_config {
        config.validate().context("Invalid mount configuration")?;
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let mountpoint = config.mount.mountpoint.clone();
    layerfs::mount_with(config).with_context(|| format!("Failed to mount at {:?}", mountpoint))
}

fn build_config(cli: &Cli) -> Config {
    Config::new(MountConfig::new(
        expand_tilde(&cli.root),
        expand_tilde(&cli.overlay),
        expand_tilde(&cli.mountpoint),
    ))
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
