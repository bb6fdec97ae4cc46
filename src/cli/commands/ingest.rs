//! Request ingester command.

use console::style;

use querybroker::config::Settings;
use querybroker::ingest::Ingester;
use querybroker::store;

use crate::cli::helpers::connect_broker;

pub async fn cmd_ingest(settings: &Settings) -> anyhow::Result<()> {
    let store = store::connect(&settings.store_url).await?;
    let broker = connect_broker(settings).await?;
    let ingester = Ingester::new(store, broker, settings.queues.clone());

    println!(
        "{} Ingesting requests from '{}', discovery to '{}'",
        style("→").cyan(),
        settings.queues.request,
        settings.queues.discovery
    );
    println!("  Press Ctrl+C to stop");

    tokio::select! {
        result = ingester.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\n{} Ingester stopped", style("✓").green());
        }
    }

    Ok(())
}
