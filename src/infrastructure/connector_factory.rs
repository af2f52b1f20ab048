//! Connector Factory
//!
//! Builds a platform connector from a platform tag plus whatever credentials
//! the caller has. Socket platforms only need the bridge endpoint from the
//! app config; REST platforms additionally need per-account credentials, so
//! the factory takes them as an explicit argument instead of reading the
//! environment.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::domain::entities::broker::Broker;
use crate::domain::entities::platform::Platform;
use crate::domain::errors::ConnectorError;
use crate::domain::repositories::platform_connector::{ConnectorResult, PlatformConnector};
use crate::infrastructure::binance_connector::{BinanceConnector, BinanceConnectorConfig};
use crate::infrastructure::ctrader_connector::{CTraderConnector, CTraderConnectorConfig};
use crate::infrastructure::socket_connector::{SocketConnector, SocketConnectorConfig};
use crate::infrastructure::webterminal_connector::{
    WebTerminalConnector, WebTerminalConnectorConfig,
};

/// Credentials for one broker account, shaped per transport.
#[derive(Debug, Clone, Default)]
pub struct ConnectorCredentials {
    pub login: Option<String>,
    pub password: Option<String>,
    pub server: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// OAuth bearer token for cTrader Open API.
    pub access_token: Option<String>,
}

impl ConnectorCredentials {
    pub fn from_broker(broker: &Broker) -> Self {
        Self {
            login: broker.username.clone(),
            password: broker.password.clone(),
            server: broker.server.clone(),
            api_key: broker.api_key.clone(),
            api_secret: broker.api_secret.clone(),
            // cTrader stores its token in the api_key slot.
            access_token: broker.api_key.clone(),
        }
    }

    fn filled(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| !v.is_empty())
    }

    pub fn has_terminal_login(&self) -> bool {
        Self::filled(&self.login).is_some() && Self::filled(&self.password).is_some()
    }
}

/// Factory for creating platform connectors
pub struct ConnectorFactory;

impl ConnectorFactory {
    /// Create a connector for `platform`. MT5 accounts with a terminal login
    /// get the WebTerminal transport; without one the socket bridge is used.
    pub fn create(
        platform: Platform,
        credentials: &ConnectorCredentials,
        config: &AppConfig,
    ) -> ConnectorResult<Arc<dyn PlatformConnector>> {
        let connector: Arc<dyn PlatformConnector> = match platform {
            Platform::Mt4 => Arc::new(Self::socket_connector(
                Platform::Mt4,
                config.mt4_endpoint.clone(),
                String::new(),
                config,
            )),
            Platform::Mt5 if credentials.has_terminal_login() => {
                Arc::new(Self::webterminal_connector(credentials, config)?)
            }
            Platform::Mt5 => Arc::new(Self::socket_connector(
                Platform::Mt5,
                config.mt5_endpoint.clone(),
                String::new(),
                config,
            )),
            Platform::NinjaTrader => Arc::new(Self::socket_connector(
                Platform::NinjaTrader,
                config.ninjatrader_endpoint.clone(),
                config.ninjatrader_account.clone(),
                config,
            )),
            Platform::CTrader => Arc::new(Self::ctrader_connector(credentials, config)?),
            Platform::Binance => Arc::new(Self::binance_connector(credentials, config)?),
        };

        info!("ConnectorFactory created {} connector", platform);
        Ok(connector)
    }

    fn socket_connector(
        platform: Platform,
        endpoint: String,
        account: String,
        config: &AppConfig,
    ) -> SocketConnector {
        SocketConnector::new(
            platform,
            SocketConnectorConfig {
                endpoint,
                account,
                reconnect_base_delay: Duration::from_secs(config.reconnect_base_delay_secs),
                max_reconnect_attempts: config.max_reconnect_attempts,
                connect_timeout: config.request_timeout(),
            },
        )
    }

    fn webterminal_connector(
        credentials: &ConnectorCredentials,
        config: &AppConfig,
    ) -> ConnectorResult<WebTerminalConnector> {
        let login = ConnectorCredentials::filled(&credentials.login)
            .and_then(|login| login.parse::<i64>().ok())
            .ok_or_else(|| {
                ConnectorError::Validation("MT5 login must be a numeric account id".to_string())
            })?;
        let password = ConnectorCredentials::filled(&credentials.password)
            .ok_or_else(|| ConnectorError::Validation("MT5 password is required".to_string()))?;
        let server = ConnectorCredentials::filled(&credentials.server)
            .ok_or_else(|| ConnectorError::Validation("MT5 server is required".to_string()))?;

        Ok(WebTerminalConnector::new(WebTerminalConnectorConfig {
            api_base: config.webterminal_api_base.clone(),
            login,
            password: password.to_string(),
            server: server.to_string(),
            request_timeout: config.request_timeout(),
            poll_interval: config.webterminal_poll_interval(),
        }))
    }

    fn ctrader_connector(
        credentials: &ConnectorCredentials,
        config: &AppConfig,
    ) -> ConnectorResult<CTraderConnector> {
        let token = ConnectorCredentials::filled(&credentials.access_token)
            .or_else(|| ConnectorCredentials::filled(&credentials.api_key))
            .ok_or_else(|| {
                ConnectorError::Validation("cTrader access token is required".to_string())
            })?;

        Ok(CTraderConnector::new(CTraderConnectorConfig {
            api_base: config.ctrader_api_base.clone(),
            access_token: token.to_string(),
            request_timeout: config.request_timeout(),
            poll_interval: config.ctrader_poll_interval(),
        }))
    }

    fn binance_connector(
        credentials: &ConnectorCredentials,
        config: &AppConfig,
    ) -> ConnectorResult<BinanceConnector> {
        let api_key = ConnectorCredentials::filled(&credentials.api_key).ok_or_else(|| {
            ConnectorError::Validation("Binance API key is required".to_string())
        })?;
        let api_secret = ConnectorCredentials::filled(&credentials.api_secret).ok_or_else(|| {
            ConnectorError::Validation("Binance API secret is required".to_string())
        })?;

        Ok(BinanceConnector::new(BinanceConnectorConfig {
            api_base: config.binance_api_base.clone(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            request_timeout: config.request_timeout(),
        }))
    }
}
