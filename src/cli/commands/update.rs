//! State updater command.

use console::style;

use querybroker::config::Settings;
use querybroker::store;
use querybroker::updater::StateUpdater;

use crate::cli::helpers::connect_broker;

pub async fn cmd_update(settings: &Settings) -> anyhow::Result<()> {
    let store = store::connect(&settings.store_url).await?;
    let broker = connect_broker(settings).await?;
    let updater = StateUpdater::new(
        store,
        broker,
        settings.queues.clone(),
        settings.phase_policy(),
    );

    let queues = &settings.queues;
    println!(
        "{} Applying progress events from '{}', '{}', '{}'",
        style("→").cyan(),
        queues.add_file,
        queues.change_phase,
        queues.set_job_count
    );
    println!("  Press Ctrl+C to stop");

    tokio::select! {
        result = updater.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\n{} Updater stopped", style("✓").green());
        }
    }

    Ok(())
}
