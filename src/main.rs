//! ==============================================================================
//! main.rs - sensor monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     real-time monitoring of the sensors installed in data-center
//!     containments. devices come from the facility backend, readings come
//!     from the mqtt broker, and the aggregated view is served over http.
//!
//! responsibilities:
//!     - load configuration and initialise logging
//!     - load sensor devices, containments and cameras from the backend
//!     - seed the engine with the most recent persisted readings
//!     - run the mqtt feed that applies live readings
//!     - serve the dashboard and json api
//!
//! relationships:
//!     - uses: config.rs, registry.rs, engine.rs, mqtt.rs, web.rs, state.rs
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                    sensor monitor (this file)                │
//!     │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐  │
//!     │  │ mqtt feed    │  │ web server   │  │ historical seed   │  │
//!     │  │ (live)       │  │ (port 3000)  │  │ (once, startup)   │  │
//!     │  └──────┬───────┘  └──────┬───────┘  └─────────┬─────────┘  │
//!     │         │                 │                    │            │
//!     │         └─────────────────┼────────────────────┘            │
//!     │                           │                                 │
//!     │                 ┌─────────┴─────────┐                       │
//!     │                 │ Arc<RwLock<state>> │ <- state.rs          │
//!     │                 │   SensorEngine     │ <- engine.rs         │
//!     │                 └───────────────────┘                       │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod config;
mod domain;
mod engine;
mod mqtt;
mod registry;
mod state;
mod thresholds;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::SensorEngine;
use crate::state::MonitorState;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration, then logging (level comes from the config)
    let (config, source) = config::MonitorConfig::load_or_default();
    init_tracing(&config.logging.level);
    source.log();
    config.log_summary();

    // step 2: device registry and lookups
    let registry = Arc::new(registry::HttpRegistry::new(&config.api)?);
    let initial = registry::load_initial_data(registry.as_ref()).await;

    // step 3: one group per sensor type, every device offline
    let engine = SensorEngine::new(&initial.devices, config.engine.history_limit);
    for group in engine.groups() {
        info!(sensor_type = %group.sensor_type, devices = group.devices.len(), "sensor group ready");
    }
    let state = MonitorState::new(engine, initial.containments, initial.cameras).shared();

    // step 4: seed averages from persisted readings without blocking live data
    let seed_state = state.clone();
    let seed_registry = registry.clone();
    let seed_limit = config.api.history_seed_limit;
    tokio::spawn(async move {
        if let Err(e) = registry::seed_history(seed_registry.as_ref(), &seed_state, seed_limit).await {
            warn!(error = %format!("{:#}", e), "historical data loading failed, continuing without it");
        }
    });

    // step 5: web server in background
    let web_state = state.clone();
    let bind = config.server.bind.clone();
    tokio::spawn(async move {
        if let Err(e) = web::serve(&bind, web_state).await {
            error!(error = %format!("{:#}", e), "web server error");
        }
    });

    // step 6: live feed until ctrl-c
    mqtt::run_feed(&config.mqtt, state, config.logging.show_sensor_data, shutdown_signal()).await;

    info!("sensor monitor stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            // without a signal handler, run until killed
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
