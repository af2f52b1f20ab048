pub mod account;
pub mod broker;
pub mod connection;
pub mod platform;
pub mod trade;
