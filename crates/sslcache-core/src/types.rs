//! Core value types: decoded counter records and the purge scope.

use serde::Serialize;

use crate::protocol::{
    SSL_PURGE_CLIENT_ALL_ENTRIES, SSL_PURGE_CLIENT_ENTRIES, SSL_PURGE_SERVER_ALL_ENTRIES,
    SSL_PURGE_SERVER_ENTRIES, SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS,
};

/// Aggregate session-cache counters, decoded from the authority's
/// fixed-size response record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    /// Total cache slots.
    pub cache_size: u32,
    /// Total entries.
    pub entries: u32,
    /// Entries still usable for resumption.
    pub active_entries: u32,
    /// Entries kept only for bookkeeping.
    pub zombies: u32,
    /// Zombies that timed out.
    pub expired_zombies: u32,
    /// Zombies from aborted handshakes.
    pub aborted_zombies: u32,
    /// Zombies from deleted sessions.
    pub deleted_zombies: u32,
}

/// Performance counters, decoded from the perfmon response record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerfInfo {
    pub client_cache_entries: u32,
    pub server_cache_entries: u32,
    pub client_active_entries: u32,
    pub server_active_entries: u32,
    pub client_handshakes_per_second: u32,
    pub server_handshakes_per_second: u32,
    pub client_reconnects_per_second: u32,
    pub server_reconnects_per_second: u32,
}

/// What a purge request should cover.
///
/// `mapped` and a non-empty `server_name` both concern server-side state;
/// the flag composer treats `mapped` as implying the server bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeScope {
    /// Purge client-side entries.
    pub client: bool,
    /// Purge server-side entries.
    pub server: bool,
    /// Also drop IIS-mapped server-name entries (implies `server`).
    pub mapped: bool,
    /// Restrict the purge to sessions for this server name.
    pub server_name: Option<String>,
}

impl PurgeScope {
    /// Compose the provider's purge bitmask for this scope.
    pub fn flags(&self) -> u32 {
        purge_flags(self.client, self.server, self.mapped)
    }
}

/// Map high-level purge intent onto the provider's bitmask.
///
/// Client selects both per-logon and all-entry client bits; server likewise;
/// mapped entries additionally set the discard-locators bit and imply the
/// server bits. Pure function, no failure mode.
pub fn purge_flags(include_client: bool, include_server: bool, include_mapped: bool) -> u32 {
    let mut flags = 0;

    if include_client {
        flags |= SSL_PURGE_CLIENT_ENTRIES | SSL_PURGE_CLIENT_ALL_ENTRIES;
    }
    if include_server || include_mapped {
        flags |= SSL_PURGE_SERVER_ENTRIES | SSL_PURGE_SERVER_ALL_ENTRIES;
    }
    if include_mapped {
        flags |= SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS;
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_BITS: u32 = SSL_PURGE_CLIENT_ENTRIES | SSL_PURGE_CLIENT_ALL_ENTRIES;
    const SERVER_BITS: u32 = SSL_PURGE_SERVER_ENTRIES | SSL_PURGE_SERVER_ALL_ENTRIES;

    #[test]
    fn purge_flags_truth_table() {
        assert_eq!(purge_flags(false, false, false), 0);
        assert_eq!(purge_flags(true, false, false), CLIENT_BITS);
        assert_eq!(purge_flags(false, true, false), SERVER_BITS);
        assert_eq!(purge_flags(true, true, false), CLIENT_BITS | SERVER_BITS);
    }

    #[test]
    fn mapped_implies_server_bits() {
        for client in [false, true] {
            for server in [false, true] {
                let flags = purge_flags(client, server, true);
                assert_eq!(flags & SERVER_BITS, SERVER_BITS);
                assert_eq!(
                    flags & SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS,
                    SSL_PURGE_SERVER_ENTRIES_DISCARD_LOCATORS
                );
            }
        }
    }

    #[test]
    fn scope_flags_match_composer() {
        let scope = PurgeScope {
            client: false,
            server: true,
            mapped: true,
            server_name: Some("host1".to_string()),
        };
        assert_eq!(scope.flags(), purge_flags(false, true, true));
    }

    #[test]
    fn cache_info_serializes_counters() {
        let info = CacheInfo {
            cache_size: 100,
            entries: 40,
            active_entries: 30,
            ..CacheInfo::default()
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["cache_size"], 100);
        assert_eq!(json["active_entries"], 30);
    }
}
