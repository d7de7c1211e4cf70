//! leash broker daemon

use std::sync::Arc;

use tracing::{info, warn};

use leash_broker::{Broker, BrokerConfig};
use leash_protocol::now_millis;
use leash_utils::{
    init_logging_with_config, remove_runtime_config, save_runtime_config, LogConfig, Result,
    RuntimeConfig,
};

/// Run the broker until interrupted
async fn run_daemon() -> Result<()> {
    let config = BrokerConfig::from_env();
    let broker = Arc::new(Broker::new(&config));

    let listener = broker.listen().await?;
    let addr = listener.local_addr().map_err(leash_utils::LeashError::Io)?;
    info!("leash broker listening on {}", addr);

    // Publish the connection details for clients on this machine
    let runtime = RuntimeConfig {
        host: config.bind.clone(),
        port: addr.port(),
        token: config.token.clone(),
        pid: std::process::id(),
        started_at_ms: now_millis(),
    };
    save_runtime_config(&runtime)?;

    let serve_handle = tokio::spawn(Arc::clone(&broker).serve(listener));

    tokio::signal::ctrl_c()
        .await
        .map_err(leash_utils::LeashError::Io)?;
    info!("Interrupt received, shutting down");

    broker.shutdown();
    let _ = serve_handle.await;

    if let Err(e) = remove_runtime_config() {
        warn!("Failed to remove runtime config: {}", e);
    }

    info!("leash broker stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging_with_config(LogConfig::broker())?;
    run_daemon().await
}
