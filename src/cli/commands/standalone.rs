//! All roles in one process.
//!
//! Gateway, ingester and updater share an in-memory broker. No worker can
//! reach it, so discovery orders are logged and dropped; progress has to come
//! from elsewhere (for example a Redis store shared with a full deployment).

use std::sync::Arc;

use console::style;

use querybroker::broker::{Broker, InMemoryBroker};
use querybroker::config::Settings;
use querybroker::gateway::{BrokerRpc, Gateway};
use querybroker::ingest::{discard_discovery, Ingester};
use querybroker::server::{self, AppState};
use querybroker::store;
use querybroker::updater::StateUpdater;

use crate::cli::helpers::{parse_bind_address, shutdown_on_ctrl_c};

pub async fn cmd_standalone(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind);

    let store = store::connect(&settings.store_url).await?;
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());

    let ingester = Ingester::new(store.clone(), broker.clone(), settings.queues.clone());
    let updater = StateUpdater::new(
        store,
        broker.clone(),
        settings.queues.clone(),
        settings.phase_policy(),
    );
    let rpc = BrokerRpc::start(broker.clone(), settings.queues.request.clone()).await?;
    let gateway = Arc::new(Gateway::new(Arc::new(rpc), settings.gateway_options()));

    println!(
        "{} Standalone broker at http://{}:{} (store: {})",
        style("→").cyan(),
        host,
        port,
        settings.store_url
    );
    println!("  Press Ctrl+C to stop");

    let state = AppState::new(gateway, shutdown_on_ctrl_c());
    tokio::select! {
        result = ingester.run() => result?,
        result = updater.run() => result?,
        result = discard_discovery(&*broker, &settings.queues.discovery) => {
            result?;
        }
        result = server::serve(state, &host, port) => result?,
    }

    println!("{} Stopped", style("✓").green());
    Ok(())
}
