pub mod backtest;
pub mod download;
pub mod instruments;
