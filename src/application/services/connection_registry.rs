//! In-memory registry of inbound terminal sessions.
//!
//! Terminals push account info, heartbeats and disconnects keyed by their
//! app id. The registry only learns about a session from its account
//! message; heartbeats for unknown ids are ignored rather than creating
//! half-filled entries. Entries are never removed, a disconnected terminal
//! stays listed as inactive.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::entities::account::TerminalAccount;
use crate::domain::entities::connection::ConnectionRecord;

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register or replace the session for `app_id` with a fresh heartbeat.
    pub async fn upsert_account(&self, app_id: &str, account: TerminalAccount) {
        let mut connections = self.connections.lock().await;
        info!(
            "Terminal account connected: {} on {} (app {})",
            account.login, account.server, app_id
        );
        connections.insert(app_id.to_string(), ConnectionRecord::new(account));
    }

    /// Refresh the heartbeat for a known session. Returns false for ids the
    /// registry has never seen an account message from.
    pub async fn touch(&self, app_id: &str) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get_mut(app_id) {
            Some(record) => {
                record.touch();
                true
            }
            None => {
                debug!("Heartbeat from unknown app id: {}", app_id);
                false
            }
        }
    }

    /// Mark a session inactive, keeping its entry and account data.
    pub async fn mark_inactive(&self, app_id: &str) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get_mut(app_id) {
            Some(record) => {
                record.mark_inactive();
                info!("Terminal disconnected: app {}", app_id);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, app_id: &str) -> Option<ConnectionRecord> {
        let connections = self.connections.lock().await;
        connections.get(app_id).cloned()
    }

    /// All known sessions with their app ids.
    pub async fn snapshot(&self) -> Vec<(String, ConnectionRecord)> {
        let connections = self.connections.lock().await;
        connections
            .iter()
            .map(|(app_id, record)| (app_id.clone(), record.clone()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
