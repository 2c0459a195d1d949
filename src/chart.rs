use crate::evaluation::TimeSeries;
use anyhow::Result;
use plotly::common::{Line, Mode};
use plotly::layout::Margin;
use plotly::{Layout, Plot, Scatter};
use std::path::Path;
use tracing::info;

pub const CHART_TITLE: &str = "Out-of-Sample Performance";

fn date_labels(series: &TimeSeries) -> Vec<String> {
    series.dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect()
}

/// Builds a two-line chart of portfolio growth against the benchmark.
pub fn growth_plot(portfolio: &TimeSeries, benchmark: &TimeSeries, benchmark_label: &str, title: &str) -> Plot {
    let mut plot = Plot::new();
    plot.set_layout(
        Layout::new()
            .title(title)
            .auto_size(true)
            .margin(Margin::new().left(56).right(24).top(64).bottom(44)),
    );

    let portfolio_trace = Scatter::new(date_labels(portfolio), portfolio.values.clone())
        .mode(Mode::Lines)
        .line(Line::new().width(1.5))
        .name("Portfolio");
    let benchmark_trace = Scatter::new(date_labels(benchmark), benchmark.values.clone())
        .mode(Mode::Lines)
        .line(Line::new().width(1.5))
        .name(benchmark_label);
    plot.add_trace(portfolio_trace);
    plot.add_trace(benchmark_trace);
    plot
}

/// Renders the chart to a standalone HTML file at `path`.
pub fn save_growth_chart(
    path: &Path,
    portfolio: &TimeSeries,
    benchmark: &TimeSeries,
    benchmark_label: &str,
) -> Result<()> {
    if portfolio.is_empty() {
        return Err(anyhow::anyhow!("Nothing to chart for {}", path.display()));
    }
    let plot = growth_plot(portfolio, benchmark, benchmark_label, CHART_TITLE);
    plot.write_html(path);
    info!("Chart saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(values: Vec<f64>) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        TimeSeries {
            dates: (0..values.len()).map(|i| start + chrono::Duration::days(i as i64)).collect(),
            values,
        }
    }

    #[test]
    fn test_chart_is_written_as_html() {
        let dir = std::env::temp_dir().join(format!("active_portfolio_chart_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("NR_Long_Only_Chart.html");

        save_growth_chart(&path, &series(vec![1.0, 1.02, 1.01]), &series(vec![1.0, 0.99, 1.0]), "^GSPC").unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains(CHART_TITLE));
        assert!(html.contains("Portfolio"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_portfolio_is_rejected() {
        let path = std::env::temp_dir().join("active_portfolio_empty_chart.html");
        assert!(save_growth_chart(&path, &TimeSeries::default(), &series(vec![1.0]), "^GSPC").is_err());
    }
}
