//! The `optitact` service binary: load the descriptor, set up logging, and
//! drive the pipeline until killed.

use std::path::PathBuf;

use anyhow::Context;
use tracing::error;

use optitact::config;
use optitact::observability::init_logging;
use optitact::Service;

fn main() -> anyhow::Result<()> {
    // Optional single argument: an explicit descriptor path
    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);

    let config = config::load_config(config_path.as_deref())
        .context("Failed to load the pipeline descriptor")?;

    let _guard = init_logging(&config.logging.level, config.logging.log_dir.clone())
        .context("Failed to initialize logging")?;

    let mut service = Service::start(&config)?;
    loop {
        if let Err(e) = service.step() {
            error!(error = %e, "Pipeline stopped");
            return Err(e.into());
        }
    }
}
