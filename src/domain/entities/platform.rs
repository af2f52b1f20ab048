use std::fmt;
use std::str::FromStr;

/// Trading platforms a connector can sync from.
///
/// The MT5 web terminal is an alternate transport for MT5 accounts, not a
/// platform of its own; its connector reports `Platform::Mt5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Mt4,
    Mt5,
    CTrader,
    NinjaTrader,
    Binance,
}

impl Platform {
    /// Lowercase identifier used in tags and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Mt4 => "mt4",
            Platform::Mt5 => "mt5",
            Platform::CTrader => "ctrader",
            Platform::NinjaTrader => "ninjatrader",
            Platform::Binance => "binance",
        }
    }

    /// Display tag embedded in trade notes and API responses.
    pub fn tag(&self) -> &'static str {
        match self {
            Platform::Mt4 => "MT4",
            Platform::Mt5 => "MT5",
            Platform::CTrader => "cTrader",
            Platform::NinjaTrader => "NinjaTrader",
            Platform::Binance => "Binance",
        }
    }

    pub fn all() -> [Platform; 5] {
        [
            Platform::Mt4,
            Platform::Mt5,
            Platform::CTrader,
            Platform::NinjaTrader,
            Platform::Binance,
        ]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mt4" => Ok(Platform::Mt4),
            "mt5" => Ok(Platform::Mt5),
            "ctrader" => Ok(Platform::CTrader),
            "ninjatrader" => Ok(Platform::NinjaTrader),
            "binance" => Ok(Platform::Binance),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}
