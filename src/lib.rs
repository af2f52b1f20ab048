//! TradeSync Library
//!
//! Broker/platform trade synchronization core of a trading journal: platform
//! connectors, file import, trade reconciliation and the HTTP API over them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
