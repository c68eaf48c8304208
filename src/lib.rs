pub mod analysis;
pub mod args;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod logging;
pub mod strategy;
pub mod util;
