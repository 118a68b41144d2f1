//! linecache server binary.

use linecache::config::Config;
use linecache::runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        shards = config.shards,
        workers = config.workers,
        "Starting linecache server"
    );

    if let Err(e) = runtime::run(&config) {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }
    Ok(())
}
