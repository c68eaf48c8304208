use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "quantlab", about = "Historical trading simulator and analysis toolkit")]
pub struct Args {
    /// Path to the YAML configuration file
    #[clap(short, long)]
    pub config: Option<String>,

    /// CSV file with OHLCV candles
    #[clap(short, long)]
    pub data: String,

    /// Strategy to run: buy_and_hold, sma_cross or rsi_reversion
    #[clap(short, long, default_value = "sma_cross")]
    pub strategy: String,

    /// Number of Monte Carlo trials to run on the resulting trade ledger
    #[clap(short, long)]
    pub monte_carlo: Option<usize>,

    /// Number of walk-forward splits to validate with
    #[clap(short, long)]
    pub walk_forward: Option<usize>,

    /// Run a parameter grid search instead of a single backtest
    #[clap(short, long, default_value = "false")]
    pub optimize: bool,

    /// Scoring metric for the grid search
    #[clap(long, default_value = "sharpe")]
    pub metric: String,

    /// Write the backtest result as JSON to this path
    #[clap(long)]
    pub output: Option<String>,
}
