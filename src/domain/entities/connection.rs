use chrono::{DateTime, Duration, Utc};

use crate::domain::entities::account::TerminalAccount;

/// Threshold after which a terminal session with no heartbeat counts as
/// offline. Applied by status listings, not by the registry itself.
pub const ONLINE_THRESHOLD_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    Inactive,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Inactive => "inactive",
        }
    }
}

/// One inbound terminal session, keyed by app id in the registry.
///
/// Volatile by design: the registry is a liveness cache, not a source of
/// truth, and losing it on restart is acceptable because trades are already
/// persisted.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub account: TerminalAccount,
    pub last_heartbeat: DateTime<Utc>,
    pub status: ConnectionStatus,
}

impl ConnectionRecord {
    pub fn new(account: TerminalAccount) -> Self {
        Self {
            account,
            last_heartbeat: Utc::now(),
            status: ConnectionStatus::Active,
        }
    }

    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
        self.status = ConnectionStatus::Active;
    }

    pub fn mark_inactive(&mut self) {
        self.status = ConnectionStatus::Inactive;
    }

    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat < Duration::seconds(ONLINE_THRESHOLD_SECS)
    }
}
