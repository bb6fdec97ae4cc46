//! Store inspection commands.

use std::path::Path;

use console::style;

use querybroker::config::Settings;
use querybroker::models::RequestHash;
use querybroker::query::Query;
use querybroker::store;

/// Print the stored record for a hash.
pub async fn cmd_lookup(settings: &Settings, hash: &str, json: bool) -> anyhow::Result<()> {
    let store = store::connect(&settings.store_url).await?;
    let Some(record) = store.lookup(&RequestHash::new(hash)).await? else {
        anyhow::bail!("No record for hash {}", hash);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let done = if record.done {
        style("yes").green()
    } else {
        style("no").yellow()
    };
    println!("{} {}", style("Request").bold(), record.hash);
    println!("  Phase:   {}", record.phase);
    println!("  Done:    {}", done);
    println!("  Jobs:    {}", record.jobs);
    if let Some(created) = record.created_at {
        println!("  Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(updated) = record.updated_at {
        println!("  Updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  Files:   {}", record.files.len());
    for entry in &record.files {
        println!("    {} ({})", entry.file, style(&entry.tree).dim());
    }
    if let Some(message) = &record.message {
        println!("  Message: {}", message);
    }

    Ok(())
}

/// Print the hash a request file maps to.
pub fn cmd_hash(file: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)?;
    let query = Query::decode(&bytes)?;
    println!("{}", query.hash());
    Ok(())
}
