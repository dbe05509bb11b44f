use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A game server discovered on the local network.
/// This is the canonical data model used by the daemon and the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerRecord {
    /// Content hash of source address and reply bytes (debugging only)
    pub id: String,

    /// Server name, trimmed
    pub name: String,

    /// Map name, e.g. "osgiliath"
    pub level: Option<String>,

    /// Game mode, e.g. "cnq"
    pub mode: Option<String>,

    /// Maximum player capacity, raw byte value
    pub slots: u8,

    /// Current player count, raw byte value. Not validated against `slots`.
    pub players: u8,
}

/// The aggregate of one collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryResult {
    /// Creation time in milliseconds since epoch
    pub timestamp: i64,

    /// One group per source address, in first-seen order
    pub servers: Vec<Vec<ServerRecord>>,

    /// Only set on the placeholder answered while a run is in progress
    pub is_loading: bool,
}

impl DiscoveryResult {
    /// A completed run's result, stamped now.
    pub fn completed(servers: Vec<Vec<ServerRecord>>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            servers,
            is_loading: false,
        }
    }

    /// Placeholder telling the caller to try again later. Never cached.
    pub fn loading() -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            servers: Vec::new(),
            is_loading: true,
        }
    }

    pub fn host_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_count(&self) -> usize {
        self.servers.iter().map(Vec::len).sum()
    }

    pub fn player_count(&self) -> u32 {
        self.servers.iter().flatten().map(|s| u32::from(s.players)).sum()
    }

    pub fn slot_count(&self) -> u32 {
        self.servers.iter().flatten().map(|s| u32::from(s.slots)).sum()
    }
}
