//! Periodic JSON status snapshot for anything watching the server from
//! outside (dashboards, smoke tests, an operator with `watch cat`).

use serde::Serialize;
use std::fs;

#[derive(Serialize, Clone, Debug)]
pub struct LiveStatus {
    /// RFC 3339 wall-clock time the snapshot was taken.
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub phase: String,
    pub score: u32,
    pub high_score: u32,
    pub time_remaining: f64,
    pub device: String,
    pub connected: bool,
    pub samples_decoded: u64,
    pub records_dropped: u64,
    pub connections_accepted: u64,
}

impl LiveStatus {
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
