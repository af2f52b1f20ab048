pub mod connection_registry;
pub mod reconciler;
pub mod sync_service;
