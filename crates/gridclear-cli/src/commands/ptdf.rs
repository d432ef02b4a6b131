use anyhow::{anyhow, Context, Result};
use gridclear_algo::market::{GskConfig, GskWeights};
use gridclear_algo::network::NetworkModel;
use gridclear_core::{Grid, LineId};
use gridclear_io::load_market_data;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

fn line_name(grid: &Grid, id: LineId) -> String {
    grid.ac_lines
        .iter()
        .find(|l| l.id == id)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| format!("line_{}", id.value()))
}

pub fn handle(data: &Path, zonal: bool, weights: GskWeights, out: Option<&Path>) -> Result<()> {
    let loaded = load_market_data(data)?;
    let grid = &loaded.data.grid;
    let model = NetworkModel::build(grid, true).context("building network model")?;
    let ptdf = model
        .ptdf
        .as_ref()
        .ok_or_else(|| anyhow!("network model was built without a PTDF"))?;

    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating '{}'", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let mut wtr = csv::Writer::from_writer(writer);

    if zonal {
        let gsk = GskConfig {
            weights,
            ..GskConfig::default()
        };
        let sens = model.zonal_sensitivities(
            grid,
            &gsk.node_weights(&loaded.data),
            gsk.normalize_empty,
        )?;
        let zonal = &sens.zonal;

        let mut header = vec!["line".to_string()];
        header.extend(zonal.zone_ids.iter().map(|z| grid.zone_name(*z)));
        wtr.write_record(&header).context("writing CSV header")?;
        for (line, row) in zonal.line_ids.iter().zip(&zonal.values) {
            let mut record = vec![line_name(grid, *line)];
            record.extend(row.iter().map(|v| v.to_string()));
            wtr.write_record(&record).context("writing CSV record")?;
        }
        info!(
            lines = zonal.line_ids.len(),
            zones = zonal.zone_ids.len(),
            "zonal PTDF written"
        );
    } else {
        let mut header = vec!["line".to_string()];
        header.extend(ptdf.node_ids.iter().map(|n| grid.node_name(*n)));
        wtr.write_record(&header).context("writing CSV header")?;
        for (line, row) in ptdf.line_ids.iter().zip(&ptdf.values) {
            let mut record = vec![line_name(grid, *line)];
            record.extend(row.iter().map(|v| v.to_string()));
            wtr.write_record(&record).context("writing CSV record")?;
        }
        info!(
            lines = ptdf.line_ids.len(),
            nodes = ptdf.node_ids.len(),
            "PTDF written"
        );
    }

    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}
