use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_shared::types::DisconnectReason;
use courier_store::{MessageStore, RelayLedger};

use courier_server::automation::{self, OsaScriptExecutor};
use courier_server::connection::ConnectionContext;
use courier_server::push::LoggingPushSender;
use courier_server::watcher::{self, ChangeDetector};
use courier_server::{server, DeviceManager, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting Courier relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config_path = ServerConfig::path_from_env();
    let config = Arc::new(ServerConfig::load(&config_path)?);
    info!(
        path = %config_path.display(),
        listen_addr = %config.listen_addr,
        archive = %config.archive_path.display(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Arc::new(Mutex::new(MessageStore::open(&config.archive_path)?));
    let ledger = Arc::new(Mutex::new(RelayLedger::open(&config.ledger_path)?));
    let manager = Arc::new(DeviceManager::new());
    let executor = Arc::new(OsaScriptExecutor::new(config.script_dir.clone()));
    if !automation::runner_available() {
        tracing::warn!(
            "osascript not found on this system, outgoing messages and actions will fail"
        );
    }
    std::fs::create_dir_all(&config.temp_dir)?;

    let detector = Arc::new(ChangeDetector::new(
        Arc::clone(&config),
        Arc::clone(&manager),
        Arc::clone(&store),
        Arc::clone(&ledger),
        Arc::new(LoggingPushSender),
    ));

    let ctx = ConnectionContext {
        config: Arc::clone(&config),
        manager: Arc::clone(&manager),
        store,
        executor,
    };

    // -----------------------------------------------------------------------
    // 4. Run: accept loop, archive watcher, shutdown signal
    // -----------------------------------------------------------------------
    let listener = server::bind(&config.listen_addr).await?;
    let watch = watcher::watch_archive(
        Arc::clone(&detector),
        config.archive_path.clone(),
        Duration::from_millis(config.poll_interval_ms),
    );

    tokio::select! {
        result = server::serve(ctx, listener) => {
            if let Err(error) = result {
                tracing::error!(%error, "accept loop failed");
                manager.kill_all(DisconnectReason::Error);
                return Err(error.into());
            }
        }
        _ = watch => {
            tracing::error!("archive watcher stopped, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    manager.kill_all(DisconnectReason::ServerClosed);
    Ok(())
}
