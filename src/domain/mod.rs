//! Core domain types and logic.

pub mod backtest;
pub mod broker;
pub mod config_validation;
pub mod error;
pub mod metrics;
pub mod ohlcv;
pub mod optimizer;
pub mod position;
pub mod sizer;
pub mod strategies;
pub mod strategy;
pub mod walk_forward;
