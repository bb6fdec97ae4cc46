//! Gateway server command.

use std::sync::Arc;

use console::style;

use querybroker::config::Settings;
use querybroker::gateway::{BrokerRpc, Gateway};
use querybroker::server::{self, AppState};

use crate::cli::helpers::{connect_broker, parse_bind_address, shutdown_on_ctrl_c};

/// Start the HTTP gateway.
pub async fn cmd_serve(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind);

    let broker = connect_broker(settings).await?;
    let rpc = BrokerRpc::start(broker, settings.queues.request.clone()).await?;
    let gateway = Arc::new(Gateway::new(Arc::new(rpc), settings.gateway_options()));

    println!(
        "{} Starting gateway at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!(
        "  Requests go to '{}', replies within {}s",
        settings.queues.request, settings.rpc_timeout_secs
    );
    println!("  Press Ctrl+C to stop");

    let state = AppState::new(gateway, shutdown_on_ctrl_c());
    server::serve(state, &host, port).await?;

    println!("{} Gateway stopped", style("✓").green());
    Ok(())
}
