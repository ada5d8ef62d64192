//! Print the declared point cloud transports and whether they load.
//!
//! Usage: `list_transports [config.yaml]`

use eyre::Result;
use point_cloud_transport_node::{Config, TransportTable, describe_transports};
use std::io::{self, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(config_file = %path, "Loading configuration");
            Config::load(&path)?
        }
        None => Config::default(),
    };

    let pct = config.build_transport()?;
    let reports = describe_transports(&pct);

    write!(io::stdout().lock(), "{}", TransportTable(&reports))?;
    Ok(())
}
