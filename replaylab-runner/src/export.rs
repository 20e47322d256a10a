//! Artifact export: JSON result plus CSV tables for external tools.
//!
//! A run directory holds:
//! - `result.json`: the full `BacktestResult`, schema-versioned
//! - `equity.csv`: every equity sample
//! - `trades.csv`: closed round trips
//! - `orders.csv`: every order in its final state
//!
//! Unknown schema versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use replaylab_core::domain::{EquityPoint, Order, OrderStatus, Trade};

use crate::optimizer::{ComboOutcome, OptimizationReport};
use crate::params::ParamSetExt;
use crate::runner::{BacktestResult, SCHEMA_VERSION};

// ─── JSON ───────────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Columns: timestamp, equity, cash
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity", "cash"])?;
    for p in equity_curve {
        wtr.write_record([
            p.timestamp.to_rfc3339(),
            format!("{:.6}", p.equity),
            format!("{:.6}", p.cash),
        ])?;
    }
    finish(wtr)
}

/// Columns: symbol, direction, entry_time, exit_time, entry_price,
/// exit_price, quantity, gross_pnl, fees, slippage, pnl
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "symbol",
        "direction",
        "entry_time",
        "exit_time",
        "entry_price",
        "exit_price",
        "quantity",
        "gross_pnl",
        "fees",
        "slippage",
        "pnl",
    ])?;
    for t in trades {
        wtr.write_record([
            t.symbol.clone(),
            format!("{:?}", t.direction),
            t.entry_time.to_rfc3339(),
            t.exit_time.to_rfc3339(),
            format!("{:.6}", t.entry_price),
            format!("{:.6}", t.exit_price),
            format!("{:.6}", t.quantity),
            format!("{:.6}", t.gross_pnl),
            format!("{:.6}", t.fees),
            format!("{:.6}", t.slippage),
            format!("{:.6}", t.pnl),
        ])?;
    }
    finish(wtr)
}

/// Columns: id, symbol, side, kind, quantity, limit_price, stop_price,
/// filled_quantity, average_fill_price, status, reason, origin,
/// submitted_at, bars_offered
pub fn export_orders_csv(orders: &[Order]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "symbol",
        "side",
        "kind",
        "quantity",
        "limit_price",
        "stop_price",
        "filled_quantity",
        "average_fill_price",
        "status",
        "reason",
        "origin",
        "submitted_at",
        "bars_offered",
    ])?;
    for o in orders {
        let reason = match &o.status {
            OrderStatus::Cancelled { reason } | OrderStatus::Rejected { reason } => reason.as_str(),
            _ => "",
        };
        wtr.write_record([
            o.id.0.to_string(),
            o.symbol.clone(),
            format!("{:?}", o.side),
            o.kind.name().to_string(),
            format!("{:.6}", o.quantity),
            optional_price(o.kind.limit_price()),
            optional_price(o.kind.stop_price()),
            format!("{:.6}", o.filled_quantity),
            format!("{:.6}", o.average_fill_price),
            o.status.label().to_string(),
            reason.to_string(),
            format!("{:?}", o.origin),
            o.submitted_at.to_rfc3339(),
            o.bars_offered.to_string(),
        ])?;
    }
    finish(wtr)
}

/// One row per combination. Columns: index, id, params, status, reason,
/// and the headline metrics of completed runs.
pub fn export_optimization_csv(report: &OptimizationReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "index",
        "id",
        "params",
        "status",
        "reason",
        "rank",
        "total_return",
        "sharpe",
        "max_drawdown",
        "trades",
        "final_equity",
    ])?;
    for r in &report.results {
        let rank = report
            .ranking
            .iter()
            .position(|&i| i == r.key.index)
            .map(|p| (p + 1).to_string())
            .unwrap_or_default();
        let mut row = vec![
            r.key.index.to_string(),
            r.key.id.clone(),
            r.params.describe(),
        ];
        match &r.outcome {
            ComboOutcome::Completed { result } => {
                let m = &result.metrics;
                row.extend([
                    "ok".to_string(),
                    String::new(),
                    rank,
                    format!("{:.6}", m.total_return),
                    format!("{:.6}", m.sharpe),
                    format!("{:.6}", m.max_drawdown),
                    m.trade_count.to_string(),
                    format!("{:.2}", result.final_equity),
                ]);
            }
            ComboOutcome::Failed { kind, reason } => {
                row.extend([format!("failed:{kind:?}"), reason.clone(), rank]);
                row.extend(std::iter::repeat(String::new()).take(5));
            }
        }
        wtr.write_record(&row)?;
    }
    finish(wtr)
}

fn optional_price(price: Option<f64>) -> String {
    price.map(|p| format!("{p:.6}")).unwrap_or_default()
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write the full artifact set for one run into `dir/<run id prefix>/`.
///
/// The directory name comes from the deterministic run id, so re-running
/// the same config over the same data overwrites the same artifacts.
/// Returns the run directory.
pub fn save_artifacts(result: &BacktestResult, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(result.run_id.short());
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    write(&run_dir.join("result.json"), &export_json(result)?)?;
    write(&run_dir.join("equity.csv"), &export_equity_csv(&result.equity_curve)?)?;
    write(&run_dir.join("trades.csv"), &export_trades_csv(&result.trades)?)?;
    write(&run_dir.join("orders.csv"), &export_orders_csv(&result.orders)?)?;

    tracing::info!(dir = %run_dir.display(), "artifacts written");
    Ok(run_dir)
}

/// Write `optimization.json` and `optimization.csv` into `dir`.
pub fn save_optimization(report: &OptimizationReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create artifact dir: {}", dir.display()))?;
    let json = serde_json::to_string_pretty(report)
        .context("failed to serialize OptimizationReport to JSON")?;
    write(&dir.join("optimization.json"), &json)?;
    write(&dir.join("optimization.csv"), &export_optimization_csv(report)?)?;
    Ok(dir.to_path_buf())
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
