#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("No candle data loaded for symbol {symbol}.")]
    NoData { symbol: String },
    #[error("No candles for {symbol} between {start} and {end}.")]
    EmptyDateRange {
        symbol: String,
        start: String,
        end: String,
    },
    #[error("Monte Carlo simulation requires a non-empty trade list.")]
    EmptyTradeList,
    #[error("Insufficient candles: got {got}, required {required}. {context}")]
    InsufficientCandles {
        got: usize,
        required: usize,
        context: String,
    },
    #[error("Grid search requires a non-empty candle dataset.")]
    EmptyDataset,
    #[error("Unknown optimization metric: {0}")]
    UnknownMetric(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Strategy error: {0}")]
    StrategyError(String),
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse date: {0}")]
    ParseDateError(#[from] chrono::ParseError),
    #[error("Serde YAML Error: {0}")]
    SerdeYamlError(#[from] serde_yaml::Error),
    #[error("Serde JSON Error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("CSV Error: {0}")]
    CsvError(#[from] csv::Error),
}
