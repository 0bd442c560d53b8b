//! Simulator binary
//!
//! Loads the TOML configuration, restores every persisted charge point from
//! the data directory, seeds the configured ones, connects and boots them
//! all, and mirrors their notices to the log until shutdown.

use std::sync::Arc;

use tracing::{error, info, warn};

use ocpp_cp_simulator::chargepoint::ChargePointRegistry;
use ocpp_cp_simulator::config::{default_config_path, AppConfig, ChargePointSeed};
use ocpp_cp_simulator::notifications::Notice;
use ocpp_cp_simulator::persistence::{ChargePointStore, JsonFileStore};
use ocpp_cp_simulator::support::ShutdownSignal;
use ocpp_cp_simulator::EventBus;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Configuration & logging ────────────────────────────────
    let config_path = std::env::var("CP_SIM_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_logging(&cfg.logging.level);
            info!("configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            let cfg = AppConfig::default();
            init_logging(&cfg.logging.level);
            warn!("failed to load config: {e}. Using defaults.");
            cfg
        }
    };

    info!("starting OCPP charge point simulator");
    info!(backend = %config.backend.url, data_dir = %config.data_dir.display(), "using");

    let store: Arc<JsonFileStore> = Arc::new(JsonFileStore::new(&config.data_dir));
    let events = EventBus::new();
    let registry = Arc::new(ChargePointRegistry::new(
        config.backend.clone(),
        events.clone(),
        store.clone(),
    ));

    // Mirror every notice to the log; this is the stand-in for the UI.
    spawn_notice_logger(&events);

    // ── Restore persisted charge points, then apply the seeds ──
    let mut serials: Vec<String> = store.list_serials().await.unwrap_or_else(|e| {
        warn!("cannot scan data directory: {e}");
        Vec::new()
    });
    for seed in &config.charge_points {
        if !serials.contains(&seed.serial) {
            serials.push(seed.serial.clone());
        }
    }
    if serials.is_empty() {
        warn!("no charge points persisted or configured; nothing to simulate");
    }

    for serial in serials {
        let seed = config.charge_points.iter().find(|s| s.serial == serial);
        match registry.get_or_create(&serial).await {
            Ok(cp) => {
                apply_seed(&cp, seed);
                let auto_start = config.auto_start;
                let reconnect = config.backend.reconnect_delay_secs;
                tokio::spawn(async move {
                    if let Err(e) = cp.connect(reconnect).await {
                        error!(serial = %cp.serial(), "connect failed: {e}");
                        return;
                    }
                    cp.boot().await;
                    if auto_start && cp.is_accepted() {
                        if let Err(e) = cp.start().await {
                            warn!(serial = %cp.serial(), "auto-charge not started: {e}");
                        }
                    }
                });
            }
            Err(e) => error!(serial, "cannot create charge point: {e}"),
        }
    }

    // ── Run until shutdown ─────────────────────────────────────
    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();
    shutdown.wait().await;

    info!("shutting down: saving {} charge point(s)", registry.len());
    registry.shutdown_all().await;
    info!("shutdown complete");
    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn apply_seed(cp: &ocpp_cp_simulator::ChargePoint, seed: Option<&ChargePointSeed>) {
    let Some(seed) = seed else { return };
    if !seed.uids.is_empty() {
        cp.set_uids(seed.uids.clone());
    }
    for (key, value) in &seed.params {
        cp.set_param(key, value.clone());
    }
}

fn spawn_notice_logger(events: &EventBus) {
    let mut subscriber = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscriber.recv().await {
            match &event.notice {
                Notice::Err(text) => warn!(cp = %event.serial, "{text}"),
                Notice::Success(text) | Notice::Message(text) => {
                    info!(cp = %event.serial, "{text}")
                }
                Notice::Unimportant(text) => tracing::debug!(cp = %event.serial, "{text}"),
                Notice::Session(Some(sess)) => {
                    info!(cp = %event.serial, session = %sess.id, uid = %sess.uid, "session started")
                }
                Notice::Session(None) => info!(cp = %event.serial, "session ended"),
                Notice::Heartbeat { resend_after } => {
                    tracing::debug!(cp = %event.serial, ?resend_after, "heartbeat")
                }
                Notice::Save(phase) => tracing::trace!(cp = %event.serial, ?phase, "save"),
            }
        }
    });
}
