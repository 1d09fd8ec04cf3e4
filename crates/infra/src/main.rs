use anyhow::Context;

use censudx_infra::InventoryConfig;
use censudx_infra::bootstrap;

fn main() -> anyhow::Result<()> {
    censudx_observability::init();

    let config = InventoryConfig::from_env().context("failed to load configuration")?;
    let core = bootstrap::start(&config)?;
    tracing::info!(
        healthy = core.coordinator.is_healthy(),
        persistent = config.use_persistent_stores,
        "inventory core running"
    );

    // Storage adapters drive their own runtime; this one only waits for Ctrl-C.
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    signals
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutdown requested");
    core.shutdown();
    Ok(())
}
