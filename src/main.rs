use std::error::Error;
use std::path::Path;

use clap::Parser;
use quantlab::{
    analysis::monte_carlo::{MonteCarloConfigBuilder, MonteCarloSimulator},
    analysis::optimizer::{OptimizationMetric, ParamSet, ParameterOptimizer},
    analysis::walk_forward::{WalkForwardAnalyzer, WalkForwardConfigBuilder},
    args::Args,
    config::BacktestConfig,
    engine::BacktestEngine,
    error::SimError,
    logging::setup_tracing,
    strategy::{BuyAndHold, RsiReversion, SmaCross, Strategy},
};

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let (_writer, _guard) = setup_tracing(Some("logs"))?;

    let config = BacktestConfig::read_config(args.config.as_deref())?;
    config.validate()?;
    println!("Loaded configuration for {}", config.symbol);

    let mut engine = BacktestEngine::new();
    engine.load_csv(&config.symbol, Path::new(&args.data))?;
    println!("Loaded historical data from {}", args.data);

    if args.optimize {
        run_grid_search(&engine, &config, &args)?;
        return Ok(());
    }

    let mut strategy = build_strategy(&args.strategy)?;
    let result = engine.run(strategy.as_mut(), &config, &args.strategy, Default::default())?;
    println!("{}", result.to_text());

    if let Some(path) = &args.output {
        result.save_json(path)?;
        println!("Result written to {path}");
    }

    if let Some(n_simulations) = args.monte_carlo {
        let mc_config = MonteCarloConfigBuilder::default()
            .n_simulations(n_simulations)
            .initial_capital(config.initial_capital)
            .exit_price_variance(0.1)
            .shuffle_trades(true)
            .build()
            .map_err(|e| SimError::ConfigError(e.to_string()))?;
        let mc = MonteCarloSimulator::new().run_simulation(&result.trades, &mc_config)?;
        println!("{}", mc.to_text());
    }

    if let Some(n_splits) = args.walk_forward {
        let wf_config = WalkForwardConfigBuilder::default()
            .n_splits(n_splits)
            .initial_capital(config.initial_capital)
            .build()
            .map_err(|e| SimError::ConfigError(e.to_string()))?;
        let candles =
            engine
                .store()
                .filter_by_date(&config.symbol, config.start_date()?, config.end_date()?)?;
        let mut strategy = build_strategy(&args.strategy)?;
        let wf = WalkForwardAnalyzer::new().run_walk_forward(
            &candles,
            strategy.as_mut(),
            &config.symbol,
            &args.strategy,
            &wf_config,
        )?;
        println!(
            "Walk-forward: robustness={:.2}, overfitting={:.2} over {} periods",
            wf.robustness_ratio,
            wf.overfitting_score,
            wf.periods.len()
        );
    }

    Ok(())
}

fn run_grid_search(
    engine: &BacktestEngine,
    config: &BacktestConfig,
    args: &Args,
) -> Result<(), Box<dyn Error>> {
    let metric: OptimizationMetric = args.metric.parse()?;
    let candles =
        engine
            .store()
            .filter_by_date(&config.symbol, config.start_date()?, config.end_date()?)?;

    let mut optimizer = ParameterOptimizer::new();
    optimizer.add_parameter("fast", vec![5.0, 10.0, 20.0]);
    optimizer.add_parameter("slow", vec![20.0, 50.0, 100.0]);
    optimizer.add_constraint(|p: &ParamSet| p["fast"] < p["slow"]);

    let result = optimizer.grid_search(
        &candles,
        &config.symbol,
        &|params: &ParamSet| -> Box<dyn Strategy> {
            let fast = params["fast"] as usize;
            let slow = params["slow"] as usize;
            Box::new(SmaCross::new(fast, slow))
        },
        config.initial_capital,
        metric,
        &config.start_date,
        &config.end_date,
    )?;

    println!(
        "Grid search over {} combinations ({} valid) in {:.2}s",
        result.total_combinations, result.valid_combinations, result.duration_seconds
    );
    println!("Best {}: {:.4} with {:?}", result.metric, result.best_score, result.best_params);
    for entry in result.parameter_matrix("score").iter().take(10) {
        match &entry.error {
            None => println!("  {:?} -> {:.4}", entry.params, entry.score),
            Some(e) => println!("  {:?} -> failed: {e}", entry.params),
        }
    }
    Ok(())
}

fn build_strategy(name: &str) -> Result<Box<dyn Strategy>, SimError> {
    match name {
        "buy_and_hold" => Ok(Box::new(BuyAndHold)),
        "sma_cross" => Ok(Box::new(SmaCross::new(10, 30))),
        "rsi_reversion" => Ok(Box::new(RsiReversion::new(14, 30.0, 70.0))),
        other => Err(SimError::StrategyError(format!("unknown strategy: {other}"))),
    }
}
