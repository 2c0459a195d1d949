use crate::config::TRADING_DAYS;
use crate::estimators::{AssetVector, Estimates};
use crate::evaluation::TimeSeries;

/// Risk/return statistics of one growth path that starts from 1.0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceSummary {
    pub final_growth: f64,
    pub annual_return: f64,
    pub annual_vol: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

/// Summarises a growth path. The implicit starting level is 1.0, so a path
/// of `n` points covers `n` daily returns.
pub fn summarize(growth: &TimeSeries) -> Option<PerformanceSummary> {
    if growth.is_empty() {
        return None;
    }
    let mut returns = Vec::with_capacity(growth.len());
    let mut prev = 1.0;
    for &v in &growth.values {
        returns.push(v / prev - 1.0);
        prev = v;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = if returns.len() > 1 {
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    let annual_vol = variance.sqrt() * TRADING_DAYS.sqrt();
    let final_growth = growth.values[growth.len() - 1];
    let annual_return = if final_growth > 0.0 {
        final_growth.powf(TRADING_DAYS / n) - 1.0
    } else {
        -1.0
    };
    let sharpe = if annual_vol > 1e-8 {
        mean * TRADING_DAYS / annual_vol
    } else {
        0.0
    };

    let mut peak: f64 = 1.0;
    let mut max_drawdown: f64 = 0.0;
    for &v in &growth.values {
        peak = peak.max(v);
        max_drawdown = max_drawdown.max(1.0 - v / peak);
    }

    Some(PerformanceSummary {
        final_growth,
        annual_return,
        annual_vol,
        sharpe,
        max_drawdown,
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Console Output
// ──────────────────────────────────────────────────────────────────────────────

pub fn print_estimates(estimates: &Estimates) {
    let cov = &estimates.covariance;
    println!("\nCovariance Matrix:");
    print!("{:>10}", "");
    for asset in &cov.assets {
        print!("{:>12}", asset);
    }
    println!();
    for (asset, row) in cov.assets.iter().zip(&cov.matrix) {
        print!("{:>10}", asset);
        for v in row {
            print!("{:>12.6}", v);
        }
        println!();
    }

    println!("\n  Symbol        Beta     Alpha");
    for ((asset, beta), alpha) in cov
        .assets
        .iter()
        .zip(&estimates.betas.values)
        .zip(&estimates.scores.values)
    {
        println!("  {:<8} {:>9.4} {:>9.4}", asset, beta, alpha);
    }
}

pub fn print_weights(label: &str, weights: &AssetVector) {
    println!("\n╔══════════════════════════════════════╗");
    println!("║  {:<36}║", format!("{} Weights", label));
    println!("╠══════════════════════════════════════╣");
    let mut sorted: Vec<(&str, f64)> = weights.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (asset, w) in sorted {
        println!("║  {:<10} {:>+10.2}%              ║", asset, w * 100.0);
    }
    println!("╠══════════════════════════════════════╣");
    println!("║  Total      {:>+10.2}%              ║", weights.sum() * 100.0);
    println!("╚══════════════════════════════════════╝");
}

/// Prints one row per labelled growth path.
pub fn print_performance(title: &str, rows: &[(String, Option<PerformanceSummary>)]) {
    println!("\n╔════════════════════════════════════════════════════════════════════╗");
    println!("║  {:<66}║", title);
    println!("╠════════════════════════════════════════════════════════════════════╣");
    println!("║  Series         Growth   Ann.Ret   Ann.Vol   Sharpe   Max DD       ║");
    println!("╠════════════════════════════════════════════════════════════════════╣");
    for (label, summary) in rows {
        match summary {
            Some(s) => println!(
                "║  {:<12} {:>7.4}  {:>+7.2}%  {:>7.2}%  {:>6.2}  {:>6.2}%       ║",
                label,
                s.final_growth,
                s.annual_return * 100.0,
                s.annual_vol * 100.0,
                s.sharpe,
                s.max_drawdown * 100.0
            ),
            None => println!("║  {:<12} {:<52} ║", label, "no evaluated windows"),
        }
    }
    println!("╚════════════════════════════════════════════════════════════════════╝");
}
