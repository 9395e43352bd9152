//! Authoritative registry of connected sessions
//!
//! This module tracks every live client session on the server:
//! - Session lifecycle (connect, rename, disconnect, timeout)
//! - Monotonic id allocation that never reuses an id within a server run
//! - Lookups by id, by name and by transport address
//! - A bounded memory of recently departed sessions, so that administrative
//!   actions aimed at a player who just left can still resolve their address
//!
//! The registry is owned by the authoritative loop and is never shared across
//! threads; other threads only ever see [`ClientSummary`] snapshots.

use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Session identifier, allocated monotonically from 1
pub type SessionId = u32;

/// Number of departed sessions remembered for identity lookups
pub const DEPARTED_HISTORY: usize = 128;

/// One connected player
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Unique id assigned by the server on connect
    pub id: SessionId,
    /// Display name, may change during the session
    pub name: String,
    /// Transport handle; the IP part is fixed for the life of the session
    pub addr: SocketAddr,
    /// Spectators watch but do not play
    pub spectator: bool,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl ClientSession {
    pub fn new(id: SessionId, name: String, addr: SocketAddr, spectator: bool) -> Self {
        Self {
            id,
            name,
            addr,
            spectator,
            last_seen: Instant::now(),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was heard from this client within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.id,
            name: self.name.clone(),
            ip: self.ip(),
            is_spectator: self.spectator,
        }
    }
}

/// Point-in-time copy of a session, safe to hand to any thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: SessionId,
    pub name: String,
    #[serde(skip)]
    pub ip: IpAddr,
    pub is_spectator: bool,
}

/// Identity of a session that has already left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartedSession {
    pub id: SessionId,
    pub name: String,
    pub ip: IpAddr,
}

/// Owns all live sessions, keyed by id so listings come out in connect order
pub struct ClientRegistry {
    sessions: BTreeMap<SessionId, ClientSession>,
    next_id: SessionId,
    departed: VecDeque<DepartedSession>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            departed: VecDeque::with_capacity(DEPARTED_HISTORY),
        }
    }

    /// Registers a new session and returns its id
    ///
    /// An empty or whitespace-only name is replaced by a default derived from
    /// the id. Ids are never handed out twice, even after disconnects.
    pub fn connect(&mut self, addr: SocketAddr, name: &str, spectator: bool) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;

        let name = Self::normalize_name(name, id);
        info!(
            "Client {} ({}) connected from {}{}",
            id,
            name,
            addr,
            if spectator { " as spectator" } else { "" }
        );
        self.sessions
            .insert(id, ClientSession::new(id, name, addr, spectator));
        id
    }

    /// The name the next [`connect`](Self::connect) with `name` would list
    pub fn resolve_name(&self, name: &str) -> String {
        Self::normalize_name(name, self.next_id)
    }

    /// Removes a session, returning it if it was still present
    ///
    /// Disconnecting an id that is already gone is a no-op.
    pub fn disconnect(&mut self, id: SessionId, reason: &str) -> Option<ClientSession> {
        let session = self.sessions.remove(&id)?;
        info!("Client {} ({}) disconnected: {}", id, session.name, reason);

        if self.departed.len() == DEPARTED_HISTORY {
            self.departed.pop_front();
        }
        self.departed.push_back(DepartedSession {
            id,
            name: session.name.clone(),
            ip: session.ip(),
        });
        Some(session)
    }

    /// Changes a live session's display name; returns false if the id is gone
    pub fn rename(&mut self, id: SessionId, name: &str) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                let name = Self::normalize_name(name, id);
                info!("Client {} renamed from {} to {}", id, session.name, name);
                session.name = name;
                true
            }
            None => false,
        }
    }

    pub fn find_by_id(&self, id: SessionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn find_by_id_mut(&mut self, id: SessionId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    /// All live sessions whose name matches exactly (case-sensitive)
    pub fn find_by_name(&self, name: &str) -> Vec<&ClientSession> {
        self.sessions
            .values()
            .filter(|session| session.name == name)
            .collect()
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|session| session.addr == addr)
            .map(|session| session.id)
    }

    /// Ids of every live session connected from `ip`
    pub fn ids_from_ip(&self, ip: IpAddr) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| session.ip() == ip)
            .map(|session| session.id)
            .collect()
    }

    /// Address of a session by id, live or recently departed
    pub fn last_known_ip_by_id(&self, id: SessionId) -> Option<IpAddr> {
        self.sessions.get(&id).map(ClientSession::ip).or_else(|| {
            self.departed
                .iter()
                .find(|departed| departed.id == id)
                .map(|departed| departed.ip)
        })
    }

    /// Most recent address seen for a name among departed sessions
    pub fn last_known_ip_by_name(&self, name: &str) -> Option<IpAddr> {
        self.departed
            .iter()
            .rev()
            .find(|departed| departed.name == name)
            .map(|departed| departed.ip)
    }

    /// Snapshot of every live session
    pub fn list(&self) -> Vec<ClientSummary> {
        self.sessions.values().map(ClientSession::summary).collect()
    }

    /// Addresses of every live session except `exclude`
    pub fn recipients(&self, exclude: Option<SessionId>) -> Vec<SocketAddr> {
        self.sessions
            .values()
            .filter(|session| Some(session.id) != exclude)
            .map(|session| session.addr)
            .collect()
    }

    /// Ids of sessions that have been silent for longer than `timeout`
    pub fn timed_out(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.id)
            .collect()
    }

    /// Removes every session, returning them for farewell delivery
    pub fn drain(&mut self, reason: &str) -> Vec<ClientSession> {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.disconnect(id, reason))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn normalize_name(name: &str, id: SessionId) -> String {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            format!("Player {}", id)
        } else {
            trimmed.to_string()
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
