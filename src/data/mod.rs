pub mod candle;
pub mod store;
