//! Shared helper functions for CLI commands.

use std::sync::Arc;

use tokio::sync::watch;

use querybroker::broker::Broker;
use querybroker::config::Settings;

/// Connect to the configured AMQP broker.
#[cfg(feature = "amqp-broker")]
pub async fn connect_broker(settings: &Settings) -> anyhow::Result<Arc<dyn Broker>> {
    tracing::info!("Connecting to broker at {}", settings.broker_url_redacted());
    let broker = querybroker::broker::AmqpBroker::connect(&settings.broker_url).await?;
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "amqp-broker"))]
pub async fn connect_broker(_settings: &Settings) -> anyhow::Result<Arc<dyn Broker>> {
    anyhow::bail!("Built without the amqp-broker feature; use `standalone` instead")
}

/// A receiver that turns true on Ctrl+C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = tx.send(true);
    });
    rx
}

/// Parse a bind address that can be:
/// - Just a port: "5000" -> 127.0.0.1:5000
/// - Just a host: "0.0.0.0" -> 0.0.0.0:5000
/// - Host and port: "0.0.0.0:5000" -> 0.0.0.0:5000
pub fn parse_bind_address(bind: &str) -> (String, u16) {
    const DEFAULT_PORT: u16 = 5000;

    if let Ok(port) = bind.parse::<u16>() {
        return ("127.0.0.1".to_string(), port);
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.to_string(), port);
        }
    }

    (bind.to_string(), DEFAULT_PORT)
}
