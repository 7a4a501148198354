//! Tunnel statistics: `wg show` output parsing and the last-known cache
//!
//! # Output formats
//!
//! `wg show <iface> latest-handshakes` prints one line per peer:
//!
//! ```text
//! <peer-public-key>\t<epoch-seconds>
//! ```
//!
//! `wg show <iface> transfer` prints one line per peer:
//!
//! ```text
//! <peer-public-key>\t<rx-bytes>\t<tx-bytes>
//! ```
//!
//! Lines are split on any whitespace. Transfer lines with exactly two fields
//! are read as `<rx> <tx>`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot returned to the presentation layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub active: bool,
    /// Most recent handshake across all peers, epoch seconds (0 = never)
    pub handshake: i64,
    /// Bytes received, summed across peers
    pub rx: i64,
    /// Bytes sent, summed across peers
    pub tx: i64,
}

impl TunnelStatus {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Last successful query results for one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub handshake: i64,
    pub rx: i64,
    pub tx: i64,
    pub has_handshake: bool,
    pub has_transfer: bool,
}

/// Per-interface cache used to paper over transient query failures
///
/// Entries are only written after a successful query and are never evicted.
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<String, CacheEntry>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, iface: &str) -> Option<&CacheEntry> {
        self.entries.get(iface)
    }

    /// Cached handshake, or 0 if none has been recorded
    pub fn handshake(&self, iface: &str) -> i64 {
        self.get(iface)
            .filter(|entry| entry.has_handshake)
            .map_or(0, |entry| entry.handshake)
    }

    /// Cached `(rx, tx)`, or zeros if none has been recorded
    pub fn transfer(&self, iface: &str) -> (i64, i64) {
        self.get(iface)
            .filter(|entry| entry.has_transfer)
            .map_or((0, 0), |entry| (entry.rx, entry.tx))
    }

    /// Overwrite the cached handshake, even with 0
    pub fn record_handshake(&mut self, iface: &str, handshake: i64) {
        let entry = self.entries.entry(iface.to_string()).or_default();
        entry.handshake = handshake;
        entry.has_handshake = true;
    }

    /// Replace the cached transfer totals with a fresh snapshot
    pub fn record_transfer(&mut self, iface: &str, rx: i64, tx: i64) {
        let entry = self.entries.entry(iface.to_string()).or_default();
        entry.rx = rx;
        entry.tx = tx;
        entry.has_transfer = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Newest handshake across all peers in `latest-handshakes` output
///
/// Lines with fewer than two fields or a non-numeric last field are skipped.
pub fn parse_latest_handshakes(output: &str) -> i64 {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return None;
            }
            fields.last()?.parse::<i64>().ok()
        })
        .fold(0, i64::max)
}

/// Sum of `(rx, tx)` across all peers in `transfer` output
pub fn parse_transfer(output: &str) -> (i64, i64) {
    let mut rx_total: i64 = 0;
    let mut tx_total: i64 = 0;

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (rx, tx) = match fields.as_slice() {
            [_, rx, tx, ..] => (rx, tx),
            [rx, tx] => (rx, tx),
            _ => continue,
        };

        if let Ok(rx) = rx.parse::<i64>() {
            rx_total = rx_total.saturating_add(rx);
        }
        if let Ok(tx) = tx.parse::<i64>() {
            tx_total = tx_total.saturating_add(tx);
        }
    }

    (rx_total, tx_total)
}
