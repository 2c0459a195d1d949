use crate::dataset::{PricePanel, PriceSeries};
use anyhow::Result;
use std::path::Path;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Writes a price panel as `Date,<asset>,<asset>,...`, one row per date.
pub fn write_panel_csv(path: &Path, panel: &PricePanel) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = Vec::with_capacity(panel.n_assets() + 1);
    header.push("Date".to_string());
    header.extend(panel.assets.iter().cloned());
    writer.write_record(&header)?;

    for (row, date) in panel.dates.iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(date.format(DATE_FORMAT).to_string());
        record.extend(panel.columns.iter().map(|col| col[row].to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!("Saved {} rows x {} assets to {}", panel.len(), panel.n_assets(), path.display());
    Ok(())
}

/// Writes a single series as `Date,<symbol>`.
pub fn write_series_csv(path: &Path, series: &PriceSeries) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Date", series.symbol.as_str()])?;
    for (date, value) in series.dates.iter().zip(&series.values) {
        writer.write_record([date.format(DATE_FORMAT).to_string(), value.to_string()])?;
    }
    writer.flush()?;

    info!("Saved {} rows of {} to {}", series.len(), series.symbol, path.display());
    Ok(())
}
