use crate::persistence::DatabaseConfig;
use std::time::Duration;

/// Runtime configuration for the sync server and its platform connectors
#[derive(Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub database: DatabaseConfig,
    pub default_user_id: String, // Journal owner until real accounts land

    // Socket bridge endpoints
    pub mt4_endpoint: String,
    pub mt5_endpoint: String,
    pub ninjatrader_endpoint: String,
    pub ninjatrader_account: String, // Account requested on connect

    // REST platform bases
    pub ctrader_api_base: String,
    pub webterminal_api_base: String,
    pub binance_api_base: String,

    pub request_timeout_secs: u64, // Timeout for outbound HTTP calls (seconds)
    pub ctrader_poll_interval_secs: u64, // cTrader history poll cadence (seconds)
    pub webterminal_poll_interval_secs: u64, // WebTerminal new-trade poll cadence (seconds)

    // Reconnection policy for socket connectors
    pub reconnect_base_delay_secs: u64, // Attempt n waits base × n
    pub max_reconnect_attempts: u32,

    // Abuse limits
    pub sync_max_attempts: u32, // Credential sync attempts per caller per window
    pub sync_window_secs: u64,  // Credential sync window length (seconds)
    pub requests_per_minute: u32, // Global request budget
}

impl AppConfig {
    /// Default configuration matching a local terminal-bridge setup
    pub fn default() -> AppConfig {
        AppConfig {
            bind_address: "0.0.0.0:3000".to_string(),
            database: DatabaseConfig::default(),
            default_user_id: "demo".to_string(),

            mt4_endpoint: "ws://localhost:8081".to_string(),
            mt5_endpoint: "ws://localhost:8080".to_string(),
            ninjatrader_endpoint: "ws://localhost:3012".to_string(),
            ninjatrader_account: "Sim101".to_string(),

            ctrader_api_base: "https://api.ctrader.com".to_string(),
            webterminal_api_base: "http://localhost:8080".to_string(),
            binance_api_base: "https://api.binance.com/api".to_string(),

            request_timeout_secs: 10,
            ctrader_poll_interval_secs: 30,
            webterminal_poll_interval_secs: 5,

            reconnect_base_delay_secs: 5,
            max_reconnect_attempts: 5,

            sync_max_attempts: 5,      // 5 attempts
            sync_window_secs: 15 * 60, // per 15 minutes
            requests_per_minute: 100,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();
        config.database = DatabaseConfig::from_env();

        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(value) if (1..=120).contains(&value) => {
                    config.request_timeout_secs = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid REQUEST_TIMEOUT_SECS value: {} (must be between 1 and 120), using default: {}",
                        value, config.request_timeout_secs
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse REQUEST_TIMEOUT_SECS '{}': {}, using default: {}",
                        timeout,
                        e,
                        config.request_timeout_secs
                    );
                }
            }
        }

        if let Ok(address) = std::env::var("BIND_ADDRESS") {
            if !address.is_empty() {
                config.bind_address = address;
            }
        }

        if let Ok(user) = std::env::var("DEFAULT_USER_ID") {
            if !user.is_empty() {
                config.default_user_id = user;
            }
        }

        if let Ok(endpoint) = std::env::var("MT4_ENDPOINT") {
            if !endpoint.is_empty() {
                config.mt4_endpoint = endpoint;
            }
        }

        if let Ok(endpoint) = std::env::var("MT5_ENDPOINT") {
            if !endpoint.is_empty() {
                config.mt5_endpoint = endpoint;
            }
        }

        if let Ok(endpoint) = std::env::var("NINJATRADER_ENDPOINT") {
            if !endpoint.is_empty() {
                config.ninjatrader_endpoint = endpoint;
            }
        }

        if let Ok(account) = std::env::var("NINJATRADER_ACCOUNT") {
            if !account.is_empty() {
                config.ninjatrader_account = account;
            }
        }

        if let Ok(base) = std::env::var("CTRADER_API_BASE") {
            if !base.is_empty() {
                config.ctrader_api_base = base;
            }
        }

        if let Ok(base) = std::env::var("WEBTERMINAL_API_BASE") {
            if !base.is_empty() {
                config.webterminal_api_base = base;
            }
        }

        if let Ok(base) = std::env::var("BINANCE_API_BASE") {
            if !base.is_empty() {
                config.binance_api_base = base;
            }
        }

        if let Ok(interval) = std::env::var("CTRADER_POLL_INTERVAL_SECS") {
            if let Ok(value) = interval.parse::<u64>() {
                if (5..=3600).contains(&value) {
                    config.ctrader_poll_interval_secs = value;
                }
            }
        }

        if let Ok(interval) = std::env::var("WEBTERMINAL_POLL_INTERVAL_SECS") {
            if let Ok(value) = interval.parse::<u64>() {
                if (1..=3600).contains(&value) {
                    config.webterminal_poll_interval_secs = value;
                }
            }
        }

        if let Ok(delay) = std::env::var("RECONNECT_BASE_DELAY_SECS") {
            if let Ok(value) = delay.parse::<u64>() {
                if (1..=60).contains(&value) {
                    config.reconnect_base_delay_secs = value;
                }
            }
        }

        if let Ok(attempts) = std::env::var("MAX_RECONNECT_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=20).contains(&value) {
                    config.max_reconnect_attempts = value;
                }
            }
        }

        if let Ok(attempts) = std::env::var("SYNC_MAX_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=100).contains(&value) {
                    config.sync_max_attempts = value;
                }
            }
        }

        if let Ok(window) = std::env::var("SYNC_WINDOW_SECS") {
            if let Ok(value) = window.parse::<u64>() {
                if (60..=86400).contains(&value) {
                    config.sync_window_secs = value;
                }
            }
        }

        if let Ok(rpm) = std::env::var("REQUESTS_PER_MINUTE") {
            if let Ok(value) = rpm.parse::<u32>() {
                if (1..=10000).contains(&value) {
                    config.requests_per_minute = value;
                }
            }
        }

        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ctrader_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ctrader_poll_interval_secs)
    }

    pub fn webterminal_poll_interval(&self) -> Duration {
        Duration::from_secs(self.webterminal_poll_interval_secs)
    }

    pub fn sync_window(&self) -> Duration {
        Duration::from_secs(self.sync_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.default_user_id, "demo");
        assert_eq!(config.mt4_endpoint, "ws://localhost:8081");
        assert_eq!(config.ninjatrader_account, "Sim101");
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.sync_max_attempts, 5);
        assert_eq!(config.sync_window_secs, 900);
    }
}
