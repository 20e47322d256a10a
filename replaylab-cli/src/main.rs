//! ReplayLab CLI: run, optimize and inspect commands.
//!
//! Commands:
//! - `run` executes one backtest described by a TOML run file
//! - `optimize` sweeps the run file's `[optimizer]` grid in parallel
//! - `inspect` loads data files and prints the load report

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use replaylab_core::{DataSource, MarketDataSet};
use replaylab_runner::{
    run_backtest, save_artifacts, save_optimization, BacktestResult, ComboOutcome,
    OptimizationReport, Optimizer, ParamSetExt, RunFile,
};

#[derive(Parser)]
#[command(name = "replaylab", about = "ReplayLab: event-driven backtesting engine")]
struct Cli {
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single backtest from a TOML run file.
    Run {
        /// Path to the run file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for result artifacts.
        #[arg(long, default_value = "results")]
        out: PathBuf,

        /// Print the full result as JSON instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Sweep the run file's parameter grid.
    Optimize {
        /// Path to the run file (must contain an [optimizer] table).
        #[arg(long)]
        config: PathBuf,

        /// Output directory for the optimization report.
        #[arg(long, default_value = "results")]
        out: PathBuf,

        /// Override the worker thread count from the run file.
        #[arg(long)]
        threads: Option<usize>,

        /// Number of ranked combinations to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Load data files and print what was kept and skipped.
    Inspect {
        /// Data files (CSV, JSON or Parquet).
        #[arg(long, required = true, num_args = 1..)]
        data: Vec<PathBuf>,

        /// Symbol for files without a symbol column.
        #[arg(long)]
        symbol: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    match cli.command {
        Commands::Run { config, out, json } => run_cmd(&config, &out, json),
        Commands::Optimize {
            config,
            out,
            threads,
            top,
        } => optimize_cmd(&config, &out, threads, top),
        Commands::Inspect { data, symbol } => inspect_cmd(data, symbol),
    }
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

fn run_cmd(config_path: &Path, out: &Path, json: bool) -> Result<()> {
    let file = RunFile::load(config_path)
        .with_context(|| format!("loading run file {}", config_path.display()))?;
    let data = file.load_data().context("loading market data")?;
    if data.report().rows_skipped() > 0 {
        tracing::warn!(skipped = data.report().rows_skipped(), "malformed rows skipped");
    }

    let mut strategy = file
        .strategy
        .build(&Default::default())
        .with_context(|| format!("building strategy '{}'", file.strategy.name))?;
    let result =
        run_backtest(&file.backtest, &data, &mut *strategy).context("backtest failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    let run_dir = save_artifacts(&result, out)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn optimize_cmd(config_path: &Path, out: &Path, threads: Option<usize>, top: usize) -> Result<()> {
    let file = RunFile::load(config_path)
        .with_context(|| format!("loading run file {}", config_path.display()))?;
    let section = file.optimizer()?;
    let mut settings = section.settings.clone();
    if threads.is_some() {
        settings.threads = threads;
    }

    let data = Arc::new(file.load_data().context("loading market data")?);
    let optimizer = Optimizer::new(file.backtest.clone(), &section.grid(), settings)?;
    tracing::info!(combinations = optimizer.len(), "starting optimization");

    let report = optimizer.run(data, |params| file.strategy.build(params))?;
    print_report(&report, top);

    let dir = save_optimization(&report, out)?;
    println!("Report saved to: {}", dir.display());
    Ok(())
}

fn inspect_cmd(paths: Vec<PathBuf>, symbol: Option<String>) -> Result<()> {
    let sources: Vec<DataSource> = paths
        .into_iter()
        .map(|path| {
            let source = DataSource::new(path);
            match &symbol {
                Some(sym) => source.with_symbol(sym.clone()),
                None => source,
            }
        })
        .collect();

    let data = MarketDataSet::load(&sources).context("loading data files")?;
    print!("{}", data.report());
    println!();
    println!("Dataset hash: {}", data.hash());
    println!("{:<10} {:>8} {:<22} {:<22}", "Symbol", "Bars", "First", "Last");
    println!("{}", "-".repeat(64));
    for sym in data.symbols() {
        let bars = data.bars(sym).unwrap_or_default();
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(f), Some(l)) => (f.timestamp.to_rfc3339(), l.timestamp.to_rfc3339()),
            _ => (String::from("-"), String::from("-")),
        };
        println!("{:<10} {:>8} {:<22} {:<22}", sym, bars.len(), first, last);
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"))
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("=== Backtest Result ===");
    println!("Run:            {}", result.run_id.short());
    println!("Symbols:        {}", result.config.symbols.join(", "));
    if let (Some(start), Some(end)) = (result.start, result.end) {
        println!("Period:         {} to {}", start.date_naive(), end.date_naive());
    }
    println!("Periods:        {}", m.periods);
    println!("Orders:         {}", result.orders.len());
    println!("Trades:         {}", m.trade_count);
    println!();
    println!("--- Performance ---");
    println!("Final Equity:   {:.2}", result.final_equity);
    println!("Net Profit:     {:.2}", result.net_profit());
    println!("Total Return:   {:.2}%", m.total_return * 100.0);
    println!("CAGR:           {:.2}%", m.cagr * 100.0);
    println!("Volatility:     {:.2}%", m.volatility * 100.0);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Sortino:        {:.3}", m.sortino);
    println!("Calmar:         {:.3}", m.calmar);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown * 100.0);
    println!("Alpha:          {}", fmt_opt(m.alpha));
    println!("Beta:           {}", fmt_opt(m.beta));
    println!("VaR 95%:        {:.2}%", m.var_95 * 100.0);
    println!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    println!("Profit Factor:  {:.2}", m.profit_factor);
    println!("Total Fees:     {:.2}", m.total_fees);

    let diag = &result.diagnostics;
    if diag.orders_rejected > 0 || diag.rows_skipped > 0 {
        println!();
        println!(
            "Rejected orders: {}, skipped rows: {}",
            diag.orders_rejected, diag.rows_skipped
        );
    }
    for warn in &diag.warnings {
        println!("WARNING: {warn}");
    }
    if diag.warnings_suppressed > 0 {
        println!("({} more warnings suppressed)", diag.warnings_suppressed);
    }
    println!();
}

fn print_report(report: &OptimizationReport, top: usize) {
    println!();
    println!("=== Optimization ===");
    println!(
        "Combinations:   {} ({} completed, {} failed)",
        report.results.len(),
        report.completed,
        report.failed
    );
    println!("Ranked by:      {:?}", report.rank_metric);
    println!();
    println!(
        "{:>4} {:<36} {:>10} {:>8} {:>8} {:>7}",
        "Rank", "Params", "Return", "Sharpe", "MaxDD", "Trades"
    );
    println!("{}", "-".repeat(78));
    for (rank, combo) in report.ranked().take(top).enumerate() {
        if let Some(result) = combo.outcome.result() {
            let m = &result.metrics;
            println!(
                "{:>4} {:<36} {:>9.2}% {:>8.3} {:>7.2}% {:>7}",
                rank + 1,
                combo.params.describe(),
                m.total_return * 100.0,
                m.sharpe,
                m.max_drawdown * 100.0,
                m.trade_count
            );
        }
    }

    let failures: Vec<_> = report
        .results
        .iter()
        .filter_map(|c| match &c.outcome {
            ComboOutcome::Failed { kind, reason } => Some((c, kind, reason)),
            ComboOutcome::Completed { .. } => None,
        })
        .collect();
    if !failures.is_empty() {
        println!();
        for (combo, kind, reason) in failures {
            println!(
                "FAILED [{}] {}: {kind:?}: {reason}",
                combo.key.index,
                combo.params.describe()
            );
        }
    }
    println!();
}
