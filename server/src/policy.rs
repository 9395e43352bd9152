//! Admission policy: IP bans and the optional name/IP whitelist
//!
//! Bans are always checked before the whitelist, so a banned address stays
//! out even when one of its names is whitelisted.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// A single whitelist rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum WhitelistEntry {
    Name(String),
    Ip(IpAddr),
}

impl WhitelistEntry {
    fn matches(&self, ip: IpAddr, name: &str) -> bool {
        match self {
            WhitelistEntry::Name(entry) => entry == name,
            WhitelistEntry::Ip(entry) => *entry == ip,
        }
    }
}

/// Whitelist state as reported to the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Whitelist {
    pub enabled: bool,
    pub entries: Vec<WhitelistEntry>,
}

/// Why a connection attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Banned,
    NotWhitelisted,
    NotAcceptingPlayers,
    NotAcceptingSpectators,
    ServerFull,
    VersionMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::Banned => "banned",
            Rejection::NotWhitelisted => "not whitelisted",
            Rejection::NotAcceptingPlayers => "server is not accepting players",
            Rejection::NotAcceptingSpectators => "server is not accepting spectators",
            Rejection::ServerFull => "server full",
            Rejection::VersionMismatch => "protocol version mismatch",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Default)]
pub struct BanWhitelistPolicy {
    bans: BTreeSet<IpAddr>,
    whitelist: BTreeSet<WhitelistEntry>,
    whitelist_enabled: bool,
}

impl BanWhitelistPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the address was not already banned
    pub fn ban(&mut self, ip: IpAddr) -> bool {
        self.bans.insert(ip)
    }

    /// Returns true if the address was banned
    pub fn unban(&mut self, ip: IpAddr) -> bool {
        self.bans.remove(&ip)
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.bans.contains(&ip)
    }

    pub fn bans(&self) -> Vec<IpAddr> {
        self.bans.iter().copied().collect()
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.whitelist_enabled
    }

    /// Toggling never touches the stored entries
    pub fn set_whitelist_enabled(&mut self, enabled: bool) {
        self.whitelist_enabled = enabled;
    }

    pub fn add_entry(&mut self, entry: WhitelistEntry) -> bool {
        self.whitelist.insert(entry)
    }

    pub fn remove_entry(&mut self, entry: &WhitelistEntry) -> bool {
        self.whitelist.remove(entry)
    }

    pub fn list_entries(&self) -> Vec<WhitelistEntry> {
        self.whitelist.iter().cloned().collect()
    }

    pub fn whitelist(&self) -> Whitelist {
        Whitelist {
            enabled: self.whitelist_enabled,
            entries: self.list_entries(),
        }
    }

    /// Decides whether a client may connect, without side effects
    pub fn check(&self, ip: IpAddr, name: &str) -> Result<(), Rejection> {
        if self.is_banned(ip) {
            return Err(Rejection::Banned);
        }

        if self.whitelist_enabled && !self.whitelist.iter().any(|e| e.matches(ip, name)) {
            return Err(Rejection::NotWhitelisted);
        }

        Ok(())
    }

    pub fn admits(&self, ip: IpAddr, name: &str) -> bool {
        self.check(ip, name).is_ok()
    }
}
