//! Resources command

use anyhow::Result;
use camino::Utf8Path;
use footprint_core::{MeasureConfig, ResourceRegistry};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::debug;

use crate::cli::ResourcesArgs;
use crate::output;

#[derive(Debug, Serialize, Tabled)]
struct ResourceRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Encrypted")]
    requires_encryption: bool,
    #[tabled(rename = "Description")]
    description: String,
}

pub async fn run(args: ResourcesArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = MeasureConfig::load(config_path)?;
    let registry = config.bootstrap_registry()?;
    let rows = rows(&registry);
    debug!("Listing {} registered resources", rows.len());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    output::header("Registered Resources");
    println!("{}", Table::new(&rows).with(Style::rounded()));
    output::info(&format!("{} resources", rows.len()));
    Ok(())
}

fn rows(registry: &ResourceRegistry) -> Vec<ResourceRow> {
    registry
        .all()
        .map(|(key, resource)| ResourceRow {
            key: key.to_string(),
            requires_encryption: resource.requires_encryption(),
            description: resource.description().to_string(),
        })
        .collect()
}
