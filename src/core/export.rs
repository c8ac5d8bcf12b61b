use crate::core::metrics::BalanceSheet;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_EXPORT_FILE: &str = "supply_demand_metrics.csv";

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Metric")]
    metric: &'a str,
    #[serde(rename = "Value")]
    value: f64,
}

/// Writes the ten balance rows as a two column `Metric,Value` CSV.
pub fn write_csv<W: Write>(sheet: &BalanceSheet, writer: W) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(writer);
    for row in sheet.rows() {
        csv_writer
            .serialize(ExportRow {
                metric: row.metric,
                value: row.value,
            })
            .with_context(|| format!("Failed to write CSV row: {}", row.metric))?;
    }
    csv_writer.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Writes the CSV to `path`, or to the default file name inside it when
/// `path` is an existing directory. Returns the file written.
pub fn export_to_path<P: AsRef<Path>>(sheet: &BalanceSheet, path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let target = if path.is_dir() {
        path.join(DEFAULT_EXPORT_FILE)
    } else {
        path.to_path_buf()
    };

    let file = std::fs::File::create(&target)
        .with_context(|| format!("Failed to create export file: {}", target.display()))?;
    write_csv(sheet, file)?;
    debug!("Exported balance to {}", target.display());
    Ok(target)
}
