pub mod platform_connector;
