//! Platform Connector Trait
//!
//! Common interface every broker integration implements, independent of
//! transport (WebSocket terminal bridge, REST polling, signed REST). Callers
//! operate on the trait and never on a concrete platform type, which also
//! keeps connectors mockable in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain::entities::account::AccountSnapshot;
use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::CanonicalTrade;
use crate::domain::errors::ConnectorError;

/// Common result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Connection lifecycle states for socket-backed connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted; the connector will not retry on its own.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Cheap status answer, always available without touching the network.
#[derive(Debug, Clone)]
pub struct PlatformStatus {
    pub connected: bool,
    pub platform: Platform,
    pub last_update: DateTime<Utc>,
    pub error: Option<String>,
}

impl PlatformStatus {
    pub fn disconnected(platform: Platform) -> Self {
        Self {
            connected: false,
            platform,
            last_update: Utc::now(),
            error: None,
        }
    }
}

/// Events a connector pushes to subscribers. Ordering between pushed trade
/// events does not necessarily match exit-time order; consumers must not
/// assume it.
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    TradeClosed(CanonicalTrade),
    AccountUpdated(AccountSnapshot),
    StatusChanged(PlatformStatus),
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Platform this connector talks to.
    fn platform(&self) -> Platform;

    /// Establish a session with the external platform. Distinguishable
    /// failures: `Connection` (network), `Authentication` (bad credentials),
    /// `Validation` (malformed input).
    async fn connect(&self) -> ConnectorResult<bool>;

    /// Release the session. Idempotent; stops any polling timer and closes
    /// any open socket so no further callbacks fire.
    async fn disconnect(&self);

    /// Pull trades over a closed interval, both bounds inclusive. An empty
    /// window yields an empty Vec, never an error.
    async fn request_trade_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ConnectorResult<Vec<CanonicalTrade>>;

    /// Last-known account snapshot; None before the first successful info
    /// exchange.
    async fn account_info(&self) -> Option<AccountSnapshot>;

    /// Current status without blocking on the network.
    async fn status(&self) -> PlatformStatus;

    /// Subscribe to pushed events. Socket bridges and pollers emit closed
    /// trades and account updates here; every connector emits status changes.
    fn subscribe_events(&self) -> broadcast::Receiver<ConnectorEvent>;
}

impl std::fmt::Debug for dyn PlatformConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConnector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_as_str() {
        assert_eq!(ConnectionState::Connected.as_str(), "connected");
        assert_eq!(ConnectionState::Failed.as_str(), "failed");
    }

    #[test]
    fn test_disconnected_status() {
        let status = PlatformStatus::disconnected(Platform::Mt4);
        assert!(!status.connected);
        assert_eq!(status.platform, Platform::Mt4);
        assert!(status.error.is_none());
    }
}
