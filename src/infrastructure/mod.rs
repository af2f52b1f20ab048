//! Concrete platform connectors and their factory.

pub mod binance_connector;
pub mod connector_factory;
pub mod ctrader_connector;
pub mod socket_connector;
pub mod webterminal_connector;
