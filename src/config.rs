use std::{
    fs::File,
    io::{BufReader, Write as _},
    path::Path,
};

use chrono::NaiveDate;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_yaml::from_reader;
use tracing::{debug, info, instrument};

use crate::error::SimError;

/// Configuration for a single simulation run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Builder)]
#[builder(setter(into), default)]
pub struct BacktestConfig {
    pub symbol: String,
    #[serde(rename = "start-date")]
    pub start_date: String,
    #[serde(rename = "end-date")]
    pub end_date: String,
    #[serde(rename = "initial-capital")]
    pub initial_capital: f64,
    #[serde(rename = "fee-rate", default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(rename = "slippage-bps", default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(rename = "max-position-size", default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(rename = "allow-short", default)]
    pub allow_short: bool,
    #[serde(rename = "use-leverage", default)]
    pub use_leverage: bool,
    #[serde(rename = "max-leverage", default = "default_max_leverage")]
    pub max_leverage: f64,
}

fn default_fee_rate() -> f64 {
    0.001 // 0.1% per trade
}

fn default_slippage_bps() -> f64 {
    5.0
}

fn default_max_position_size() -> f64 {
    1.0
}

fn default_max_leverage() -> f64 {
    1.0
}

const DEFAULT_DATA: &str = r#"
symbol: "BTCUSDT"
start-date: "2024-01-01"
end-date: "2024-12-31"
initial-capital: 10000.0
fee-rate: 0.001
slippage-bps: 5
max-position-size: 1.0
allow-short: false
"#;

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-12-31".to_string(),
            initial_capital: 10000.0,
            fee_rate: default_fee_rate(),
            slippage_bps: default_slippage_bps(),
            max_position_size: default_max_position_size(),
            allow_short: false,
            use_leverage: false,
            max_leverage: default_max_leverage(),
        }
    }
}

impl BacktestConfig {
    pub fn new(symbol: &str, start_date: &str, end_date: &str, initial_capital: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            initial_capital,
            ..Default::default()
        }
    }

    /// Reads the configuration from a YAML file.
    ///
    /// If the file does not exist, it creates a default configuration file.
    ///
    /// # Arguments
    ///
    /// * `filename` - Optional path to the configuration file.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `BacktestConfig` on success or a `SimError` on failure.
    #[instrument(level = "info", skip(filename))]
    pub fn read_config<P: AsRef<Path>>(filename: Option<P>) -> Result<Self, SimError> {
        let path = filename
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or_else(|| Path::new("config.yml").to_path_buf());

        info!(path = %path.display(), "Reading configuration");

        if !path.exists() {
            info!(
                "Config file does not exist. Creating default config at {}",
                path.display()
            );
            let mut file = File::create(&path)?;
            file.write_all(DEFAULT_DATA.as_bytes())?;
            debug!("Default configuration file created");
            return Ok(BacktestConfig::default());
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let config: Self = from_reader(reader)?;
        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Checks the numeric bounds the simulation relies on.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.initial_capital <= 0.0 {
            return Err(SimError::ConfigError(format!(
                "initial-capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.max_position_size > 1.0 && !self.use_leverage {
            return Err(SimError::ConfigError(format!(
                "max-position-size {} exceeds 1.0 without leverage enabled",
                self.max_position_size
            )));
        }
        if self.fee_rate < 0.0 || self.slippage_bps < 0.0 {
            return Err(SimError::ConfigError(
                "fee-rate and slippage-bps must be non-negative".to_string(),
            ));
        }
        // Both bounds must parse
        self.start_date()?;
        self.end_date()?;
        Ok(())
    }

    /// Converts the start date to a `NaiveDate`.
    pub fn start_date(&self) -> Result<NaiveDate, SimError> {
        let date = NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d")?;
        Ok(date)
    }

    /// Converts the end date to a `NaiveDate`.
    pub fn end_date(&self) -> Result<NaiveDate, SimError> {
        let date = NaiveDate::parse_from_str(&self.end_date, "%Y-%m-%d")?;
        Ok(date)
    }
}
