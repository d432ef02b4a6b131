use anyhow::{bail, Result};
use gridclear_algo::market::ClearingConfig;
use gridclear_algo::topology::validate_topology;
use gridclear_io::load_market_data;
use std::io::{self, Write};
use std::path::Path;
use tabwriter::TabWriter;
use tracing::info;

pub fn handle(data: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let loaded = load_market_data(data)?;
    let mut diagnostics = loaded.diagnostics;

    let report = validate_topology(&loaded.data.grid);
    let islands = report.islands.island_count();
    diagnostics.merge(report.diagnostics);

    if let Some(path) = config {
        let config = ClearingConfig::from_toml_file(path)?;
        diagnostics.merge(config.validate(&loaded.data));
    }
    info!(summary = %diagnostics.summary(), "validation finished");

    if json {
        serde_json::to_writer_pretty(io::stdout(), &diagnostics)?;
        println!();
    } else {
        let stats = loaded.data.grid.stats();
        let mut writer = TabWriter::new(io::stdout());
        writeln!(writer, "nodes\t{}", stats.num_nodes)?;
        writeln!(writer, "ac lines\t{}", stats.num_ac_lines)?;
        writeln!(writer, "dc lines\t{}", stats.num_dc_lines)?;
        writeln!(writer, "zones\t{}", stats.num_zones)?;
        writeln!(writer, "slack nodes\t{}", stats.num_slack)?;
        writeln!(writer, "islands\t{islands}")?;
        writeln!(writer, "plants\t{}", loaded.data.plants.len())?;
        writeln!(writer, "storages\t{}", loaded.data.storages.len())?;
        writeln!(writer, "prosumers\t{}", loaded.data.prosumers.len())?;
        writer.flush()?;
        println!();
        if diagnostics.has_issues() {
            print!("{diagnostics}");
        } else {
            println!("{}", diagnostics.summary());
        }
    }

    if diagnostics.has_errors() {
        bail!("validation found {} error(s)", diagnostics.error_count());
    }
    Ok(())
}
