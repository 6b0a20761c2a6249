//! Tibber prices daemon entry point
//!
//! Wires the CLI configuration into a coordinator and either runs a single
//! update cycle (`--once`) or the quarter-hour scheduler loop until ctrl-c.

use chrono::Local;
use clap::Parser;
use tracing::info;

use tibber_prices::cache::CacheStore;
use tibber_prices::cli::Cli;
use tibber_prices::coordinator::schedule::Scheduler;
use tibber_prices::coordinator::{Coordinator, RefreshRequest};
use tibber_prices::data::TibberClient;
use tibber_prices::validation::DstTransition;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let client = TibberClient::new(&cli.access_token)?;
    let store = match &cli.cache_dir {
        Some(dir) => CacheStore::with_dir(dir.clone(), &cli.installation_id),
        None => CacheStore::new(&cli.installation_id)
            .ok_or("could not determine a cache directory; pass --cache-dir")?,
    };
    let mut coordinator = Coordinator::new(client, store, cli.home_id.as_deref());

    if cli.once {
        let now = Local::now();
        let dst = DstTransition::detect(&now);
        let request = coordinator.initialize(now.naive_local(), dst);
        let outcome = coordinator
            .run_cycle(now.naive_local(), dst, matches!(request, RefreshRequest::Forced))
            .await?;
        info!(
            state = %outcome.state,
            fetched = outcome.fetched,
            rate_limited = outcome.rate_limited,
            "single update cycle complete"
        );
        return Ok(());
    }

    let (scheduler, handle) = Scheduler::new(coordinator);

    // ctrl-c stops the loop after the current tick
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown().await;
        }
    });

    scheduler.run().await?;
    Ok(())
}
