//! Command-line interface for the Tibber prices daemon
//!
//! Parses the access token, optional home id (used to derive this
//! installation's distributed fetch slot) and cache location, plus the
//! `--once` flag for running a single update cycle instead of the daemon
//! loop.

use std::path::PathBuf;

use clap::Parser;

/// Tibber price fetcher with durable caching and self-healing validation
#[derive(Parser, Debug)]
#[command(name = "tibber-prices")]
#[command(about = "Fetch and cache Tibber hourly energy prices on a time-aware schedule")]
#[command(version)]
pub struct Cli {
    /// Tibber API access token
    #[arg(long, env = "TIBBER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Home id used to derive a stable per-installation fetch slot
    ///
    /// Without it the slot is randomized on every start.
    #[arg(long)]
    pub home_id: Option<String>,

    /// Identity keying the persisted cache blob
    ///
    /// Set this when running several accounts on one machine.
    #[arg(long, default_value = "default")]
    pub installation_id: String,

    /// Directory for the persisted cache (defaults to the XDG cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Run a single update cycle and exit instead of scheduling
    #[arg(long)]
    pub once: bool,
}
