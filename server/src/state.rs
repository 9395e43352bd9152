//! Mutable server state owned by the authoritative loop
//!
//! Everything in [`ServerState`] is touched from one task only. Packets from
//! the network receiver, operations from the command bridge and periodic ticks
//! all end up as plain `&mut self` calls here, so none of it needs locking.
//! Outgoing traffic is handed to the network sender as [`Outbound`] messages.

use crate::client_registry::{ClientRegistry, ClientSummary, SessionId};
use crate::config::ServerConfig;
use crate::countdown::{CountdownEvent, CountdownScheduler};
use crate::policy::{BanWhitelistPolicy, Rejection, Whitelist, WhitelistEntry};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Messages sent from the authoritative loop to the network sender
#[derive(Debug)]
pub enum Outbound {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        recipients: Vec<SocketAddr>,
    },
}

/// Single-word flags readable from any thread without the bridge
///
/// Only the authoritative loop writes them; other threads get
/// eventually-consistent reads, which is enough for status reporting.
#[derive(Debug)]
pub struct ServerFlags {
    accepting_players: AtomicBool,
    accepting_spectators: AtomicBool,
    whitelist_enabled: AtomicBool,
    running: AtomicBool,
}

impl ServerFlags {
    pub fn new() -> Self {
        Self {
            accepting_players: AtomicBool::new(true),
            accepting_spectators: AtomicBool::new(true),
            whitelist_enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn accepting_players(&self) -> bool {
        self.accepting_players.load(Ordering::Acquire)
    }

    pub fn accepting_spectators(&self) -> bool {
        self.accepting_spectators.load(Ordering::Acquire)
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.whitelist_enabled.load(Ordering::Acquire)
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Release);
    }
}

impl Default for ServerFlags {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ServerState {
    registry: ClientRegistry,
    policy: BanWhitelistPolicy,
    countdown: CountdownScheduler,
    flags: Arc<ServerFlags>,
    outbound: mpsc::UnboundedSender<Outbound>,
    max_clients: usize,
    client_timeout: Duration,
    stop_requested: bool,
}

impl ServerState {
    /// Builds the state for one run of the server
    ///
    /// The policy and flags outlive a run; sessions and the countdown do not.
    pub fn new(
        config: &ServerConfig,
        policy: BanWhitelistPolicy,
        flags: Arc<ServerFlags>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            policy,
            countdown: CountdownScheduler::new(),
            flags,
            outbound,
            max_clients: config.max_clients,
            client_timeout: config.client_timeout,
            stop_requested: false,
        }
    }

    /// Processes one datagram received from `addr`
    pub fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                name,
                spectator,
            } => {
                let existing = self.registry.find_by_addr(addr);

                match self.admit(addr, client_version, &name, spectator, existing) {
                    Ok(client_id) => self.send(Packet::Connected { client_id }, addr),
                    Err(rejection) => {
                        info!(
                            "Rejected connection from {} ({:?}): {}",
                            addr, name, rejection
                        );
                        match existing {
                            // The admitted session stays; repeat its acknowledgement
                            Some(client_id) => {
                                self.touch(client_id);
                                self.send(Packet::Connected { client_id }, addr);
                            }
                            None => self.send(
                                Packet::Disconnected {
                                    reason: rejection.to_string(),
                                },
                                addr,
                            ),
                        }
                    }
                }
            }

            Packet::Heartbeat => {
                if let Some(id) = self.registry.find_by_addr(addr) {
                    self.touch(id);
                }
            }

            Packet::Rename { name } => {
                if let Some(id) = self.registry.find_by_addr(addr) {
                    self.touch(id);
                    self.registry.rename(id, &name);
                }
            }

            Packet::Disconnect => {
                if let Some(id) = self.registry.find_by_addr(addr) {
                    self.remove_session(id, "left", false);
                }
            }

            other => {
                warn!("Unexpected packet from {}: {:?}", addr, other);
            }
        }
    }

    /// Runs the admission checks in order and registers the client on success
    ///
    /// `existing` is a live session from the same address. It is replaced only
    /// once the new connection has passed every check, and its slot does not
    /// count against capacity.
    fn admit(
        &mut self,
        addr: SocketAddr,
        client_version: u32,
        name: &str,
        spectator: bool,
        existing: Option<SessionId>,
    ) -> Result<SessionId, Rejection> {
        if client_version != PROTOCOL_VERSION {
            return Err(Rejection::VersionMismatch);
        }

        // Checked under the same name the session would be listed as
        let name = self.registry.resolve_name(name);
        self.policy.check(addr.ip(), &name)?;

        if spectator && !self.flags.accepting_spectators() {
            return Err(Rejection::NotAcceptingSpectators);
        }
        if !spectator && !self.flags.accepting_players() {
            return Err(Rejection::NotAcceptingPlayers);
        }

        let occupied = self.registry.len() - usize::from(existing.is_some());
        if occupied >= self.max_clients {
            return Err(Rejection::ServerFull);
        }

        if let Some(existing) = existing {
            info!("Replacing existing client {} from {}", existing, addr);
            self.remove_session(existing, "reconnected", false);
        }

        let id = self.registry.connect(addr, &name, spectator);
        let joined = Packet::PlayerJoined {
            client_id: id,
            name,
            spectator,
        };
        self.broadcast(joined, Some(id));
        Ok(id)
    }

    /// Advances timers: countdown steps and client timeouts
    pub fn tick(&mut self, now: Instant) {
        let events = self.countdown.tick(now);
        self.emit_countdown(events);

        for id in self.registry.timed_out(self.client_timeout) {
            self.remove_session(id, "timed out", true);
        }
    }

    pub fn list_clients(&self) -> Vec<ClientSummary> {
        self.registry.list()
    }

    pub fn broadcast_message(&mut self, text: &str) {
        info!("Server message: {}", text);
        self.broadcast(
            Packet::ServerMessage {
                text: text.to_string(),
            },
            None,
        );
    }

    pub fn start_countdown(
        &mut self,
        pre_commands: String,
        post_commands: String,
        duration_secs: u32,
        now: Instant,
    ) {
        let events = self
            .countdown
            .start(pre_commands, post_commands, duration_secs, now);
        self.emit_countdown(events);
    }

    pub fn cancel_countdown(&mut self) -> bool {
        self.countdown.cancel()
    }

    /// Kicks every session with this exact name, returning how many left
    pub fn disconnect_by_name(&mut self, name: &str, reason: &str) -> usize {
        let ids: Vec<SessionId> = self
            .registry
            .find_by_name(name)
            .iter()
            .map(|session| session.id)
            .collect();

        ids.into_iter()
            .filter(|id| self.remove_session(*id, reason, true))
            .count()
    }

    /// Returns false if the session was already gone
    pub fn disconnect_by_id(&mut self, id: SessionId, reason: &str) -> bool {
        self.remove_session(id, reason, true)
    }

    /// Bans an address and removes every session connected from it
    pub fn ban_ip(&mut self, ip: IpAddr) -> usize {
        if self.policy.ban(ip) {
            info!("Banned {}", ip);
        }

        self.registry
            .ids_from_ip(ip)
            .into_iter()
            .filter(|id| self.remove_session(*id, "banned", true))
            .count()
    }

    /// Bans the address of every session with this name
    ///
    /// Falls back to the last address seen for the name if nobody by that name
    /// is connected any more. Returns how many distinct addresses were banned.
    pub fn ban_by_name(&mut self, name: &str) -> usize {
        let mut ips: Vec<IpAddr> = self
            .registry
            .find_by_name(name)
            .iter()
            .map(|session| session.ip())
            .collect();

        if ips.is_empty() {
            ips.extend(self.registry.last_known_ip_by_name(name));
        }
        ips.sort();
        ips.dedup();

        if ips.is_empty() {
            debug!("Ban by name {:?}: no such player", name);
        }
        for ip in &ips {
            self.ban_ip(*ip);
        }
        ips.len()
    }

    /// Bans the address of a session, live or recently departed
    pub fn ban_by_id(&mut self, id: SessionId) -> bool {
        match self.registry.last_known_ip_by_id(id) {
            Some(ip) => {
                self.ban_ip(ip);
                true
            }
            None => {
                debug!("Ban by id {}: no such player", id);
                false
            }
        }
    }

    pub fn unban(&mut self, ip: IpAddr) -> bool {
        let removed = self.policy.unban(ip);
        if removed {
            info!("Unbanned {}", ip);
        }
        removed
    }

    pub fn bans(&self) -> Vec<IpAddr> {
        self.policy.bans()
    }

    pub fn set_accepting_players(&mut self, value: bool) {
        info!("Accepting players: {}", value);
        self.flags.accepting_players.store(value, Ordering::Release);
    }

    pub fn set_accepting_spectators(&mut self, value: bool) {
        info!("Accepting spectators: {}", value);
        self.flags
            .accepting_spectators
            .store(value, Ordering::Release);
    }

    pub fn whitelist(&self) -> Whitelist {
        self.policy.whitelist()
    }

    pub fn set_whitelist_enabled(&mut self, enabled: bool) {
        info!("Whitelist enabled: {}", enabled);
        self.policy.set_whitelist_enabled(enabled);
        self.flags.whitelist_enabled.store(enabled, Ordering::Release);
    }

    pub fn add_whitelist_entry(&mut self, entry: WhitelistEntry) -> bool {
        debug!("Whitelist add {:?}", entry);
        self.policy.add_entry(entry)
    }

    pub fn remove_whitelist_entry(&mut self, entry: &WhitelistEntry) -> bool {
        debug!("Whitelist remove {:?}", entry);
        self.policy.remove_entry(entry)
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Says goodbye to every session and clears transient state
    pub fn shutdown(&mut self) {
        self.countdown.cancel();
        for session in self.registry.drain("server stopped") {
            self.send(
                Packet::Disconnected {
                    reason: "server stopped".to_string(),
                },
                session.addr,
            );
        }
    }

    /// Ends the run, handing back the policy for the next one
    pub fn into_policy(self) -> BanWhitelistPolicy {
        self.policy
    }

    fn touch(&mut self, id: SessionId) {
        if let Some(session) = self.registry.find_by_id_mut(id) {
            session.touch();
        }
    }

    /// Drops a session, optionally telling the peer why, and announces it
    fn remove_session(&mut self, id: SessionId, reason: &str, notify_peer: bool) -> bool {
        let Some(session) = self.registry.disconnect(id, reason) else {
            return false;
        };

        if notify_peer {
            self.send(
                Packet::Disconnected {
                    reason: reason.to_string(),
                },
                session.addr,
            );
        }
        self.broadcast(Packet::PlayerLeft { client_id: id }, None);
        true
    }

    fn emit_countdown(&mut self, events: Vec<CountdownEvent>) {
        for event in events {
            let packet = match event {
                CountdownEvent::PreCommands(commands) | CountdownEvent::PostCommands(commands) => {
                    Packet::RunCommands { commands }
                }
                CountdownEvent::Remaining(remaining) => Packet::Countdown { remaining },
            };
            self.broadcast(packet, None);
        }
    }

    fn send(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outbound.send(Outbound::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast(&self, packet: Packet, exclude: Option<SessionId>) {
        let recipients = self.registry.recipients(exclude);

        if recipients.is_empty() {
            return;
        }

        if let Err(e) = self
            .outbound
            .send(Outbound::BroadcastPacket { packet, recipients })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        state: ServerState,
        flags: Arc<ServerFlags>,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Harness {
        fn new() -> Self {
            let config = ServerConfig {
                max_clients: 4,
                ..ServerConfig::default()
            };
            let flags = Arc::new(ServerFlags::new());
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                state: ServerState::new(
                    &config,
                    BanWhitelistPolicy::new(),
                    Arc::clone(&flags),
                    tx,
                ),
                flags,
                rx,
            }
        }

        fn connect(&mut self, addr: &str, name: &str, spectator: bool) -> SocketAddr {
            let addr: SocketAddr = addr.parse().unwrap();
            self.state.handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    name: name.to_string(),
                    spectator,
                },
                addr,
            );
            addr
        }

        fn outbound(&mut self) -> Vec<Outbound> {
            let mut messages = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                messages.push(message);
            }
            messages
        }

        fn sent_to(&mut self, addr: SocketAddr) -> Vec<Packet> {
            self.outbound()
                .into_iter()
                .filter_map(|message| match message {
                    Outbound::SendPacket { packet, addr: a } if a == addr => Some(packet),
                    _ => None,
                })
                .collect()
        }

        fn names(&self) -> Vec<String> {
            self.state.list_clients().into_iter().map(|c| c.name).collect()
        }
    }

    #[test]
    fn test_connect_is_acknowledged() {
        let mut h = Harness::new();
        let addr = h.connect("10.0.0.1:5000", "chell", false);

        assert_eq!(h.sent_to(addr), vec![Packet::Connected { client_id: 1 }]);
        assert_eq!(h.names(), vec!["chell"]);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut h = Harness::new();
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        h.state.handle_packet(
            Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
                name: "old".to_string(),
                spectator: false,
            },
            addr,
        );

        assert!(h.state.list_clients().is_empty());
        assert_eq!(
            h.sent_to(addr),
            vec![Packet::Disconnected {
                reason: Rejection::VersionMismatch.to_string()
            }]
        );
    }

    #[test]
    fn test_banned_ip_rejected_even_if_whitelisted() {
        let mut h = Harness::new();
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        h.state.set_whitelist_enabled(true);
        h.state
            .add_whitelist_entry(WhitelistEntry::Name("a".to_string()));
        h.state.ban_ip(ip);

        let addr = h.connect("10.0.0.7:5000", "a", false);
        assert!(h.state.list_clients().is_empty());
        assert_eq!(
            h.sent_to(addr),
            vec![Packet::Disconnected {
                reason: "banned".to_string()
            }]
        );
    }

    #[test]
    fn test_acceptance_flags_gate_each_kind() {
        let mut h = Harness::new();
        h.state.set_accepting_players(false);
        assert!(!h.flags.accepting_players());

        h.connect("10.0.0.1:1", "player", false);
        h.connect("10.0.0.2:1", "watcher", true);
        assert_eq!(h.names(), vec!["watcher"]);

        h.state.set_accepting_players(true);
        h.state.set_accepting_spectators(false);
        h.connect("10.0.0.3:1", "player", false);
        h.connect("10.0.0.4:1", "watcher2", true);
        assert_eq!(h.names(), vec!["watcher", "player"]);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut h = Harness::new();
        for i in 0..5 {
            h.connect(&format!("10.0.0.{}:1", i + 1), "p", false);
        }
        assert_eq!(h.state.list_clients().len(), 4);
    }

    #[test]
    fn test_reconnect_from_same_address_replaces_session() {
        let mut h = Harness::new();
        h.connect("10.0.0.1:1", "a", false);
        h.connect("10.0.0.1:1", "a", false);

        let clients = h.state.list_clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id, 2);
    }

    #[test]
    fn test_rejected_reconnect_keeps_admitted_session() {
        let mut h = Harness::new();
        let addr = h.connect("10.0.0.1:1", "a", false);
        h.outbound();

        h.state.set_accepting_players(false);
        h.connect("10.0.0.1:1", "a", false);

        let clients = h.state.list_clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id, 1);
        assert_eq!(h.sent_to(addr), vec![Packet::Connected { client_id: 1 }]);
    }

    #[test]
    fn test_reconnect_at_capacity_replaces_session() {
        let mut h = Harness::new();
        for i in 0..4 {
            h.connect(&format!("10.0.0.{}:1", i + 1), "p", false);
        }
        h.connect("10.0.0.1:1", "p", false);

        let ids: Vec<SessionId> = h.state.list_clients().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_whitelist_checks_listed_name() {
        let mut h = Harness::new();
        h.state.set_whitelist_enabled(true);
        h.state
            .add_whitelist_entry(WhitelistEntry::Name("bob".to_string()));

        h.connect("10.0.0.1:1", "bob ", false);
        assert_eq!(h.names(), vec!["bob"]);

        h.state
            .add_whitelist_entry(WhitelistEntry::Name("Player 2".to_string()));
        h.connect("10.0.0.2:1", "  ", false);
        assert_eq!(h.names(), vec!["bob", "Player 2"]);
    }

    #[test]
    fn test_disconnect_by_name_removes_all_matches() {
        let mut h = Harness::new();
        h.connect("10.0.0.1:1", "a", false);
        h.connect("10.0.0.2:1", "b", false);
        h.connect("10.0.0.3:1", "a", false);

        assert_eq!(h.state.disconnect_by_name("a", "kicked"), 2);
        assert_eq!(h.names(), vec!["b"]);
        assert_eq!(h.state.disconnect_by_name("a", "kicked"), 0);
    }

    #[test]
    fn test_kicked_client_is_told_why() {
        let mut h = Harness::new();
        let addr = h.connect("10.0.0.1:1", "a", false);
        h.outbound();

        assert!(h.state.disconnect_by_id(1, "kicked"));
        assert!(!h.state.disconnect_by_id(1, "kicked"));
        assert_eq!(
            h.sent_to(addr),
            vec![Packet::Disconnected {
                reason: "kicked".to_string()
            }]
        );
    }

    #[test]
    fn test_ban_by_name_after_disconnect_uses_last_known_ip() {
        let mut h = Harness::new();
        h.connect("10.0.0.9:1", "a", false);
        h.state.handle_packet(Packet::Disconnect, "10.0.0.9:1".parse().unwrap());
        assert!(h.state.list_clients().is_empty());

        assert_eq!(h.state.ban_by_name("a"), 1);
        assert_eq!(h.state.bans(), vec!["10.0.0.9".parse::<IpAddr>().unwrap()]);
        assert_eq!(h.state.ban_by_name("never-seen"), 0);
    }

    #[test]
    fn test_ban_by_id_disconnects_everyone_on_that_ip() {
        let mut h = Harness::new();
        h.connect("10.0.0.9:1", "a", false);
        h.connect("10.0.0.9:2", "alt", false);
        h.connect("10.0.0.1:1", "b", false);

        assert!(h.state.ban_by_id(1));
        assert_eq!(h.names(), vec!["b"]);
        assert!(!h.state.ban_by_id(999));
    }

    #[test]
    fn test_unban_twice_is_harmless() {
        let mut h = Harness::new();
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        h.state.ban_ip(ip);

        assert!(h.state.unban(ip));
        assert!(!h.state.unban(ip));
        assert!(h.state.bans().is_empty());
    }

    #[test]
    fn test_rename_updates_registry() {
        let mut h = Harness::new();
        let addr = h.connect("10.0.0.1:1", "a", false);
        h.state.handle_packet(
            Packet::Rename {
                name: "atlas".to_string(),
            },
            addr,
        );
        assert_eq!(h.names(), vec!["atlas"]);
    }

    #[test]
    fn test_countdown_broadcasts() {
        let mut h = Harness::new();
        h.connect("10.0.0.1:1", "a", false);
        h.outbound();

        let t0 = Instant::now();
        h.state
            .start_countdown("go".to_string(), "stop".to_string(), 2, t0);
        h.state.tick(t0 + Duration::from_secs(1));
        h.state.tick(t0 + Duration::from_secs(2));

        let broadcasts: Vec<Packet> = h
            .outbound()
            .into_iter()
            .filter_map(|message| match message {
                Outbound::BroadcastPacket { packet, .. } => Some(packet),
                _ => None,
            })
            .collect();
        assert_eq!(
            broadcasts,
            vec![
                Packet::RunCommands {
                    commands: "go".to_string()
                },
                Packet::Countdown { remaining: 2 },
                Packet::Countdown { remaining: 1 },
                Packet::RunCommands {
                    commands: "stop".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_whitelist_toggle_mirrors_flag() {
        let mut h = Harness::new();
        h.state.set_whitelist_enabled(true);
        assert!(h.flags.whitelist_enabled());
        assert!(h.state.whitelist().enabled);

        h.connect("10.0.0.1:1", "stranger", false);
        assert!(h.state.list_clients().is_empty());

        h.state
            .add_whitelist_entry(WhitelistEntry::Ip("10.0.0.1".parse().unwrap()));
        h.connect("10.0.0.1:1", "stranger", false);
        assert_eq!(h.names(), vec!["stranger"]);
    }

    #[test]
    fn test_shutdown_notifies_everyone() {
        let mut h = Harness::new();
        let a = h.connect("10.0.0.1:1", "a", false);
        let b = h.connect("10.0.0.2:1", "b", false);
        h.outbound();

        h.state.shutdown();
        assert!(h.state.list_clients().is_empty());

        let farewells: Vec<SocketAddr> = h
            .outbound()
            .into_iter()
            .filter_map(|message| match message {
                Outbound::SendPacket {
                    packet: Packet::Disconnected { .. },
                    addr,
                } => Some(addr),
                _ => None,
            })
            .collect();
        assert_eq!(farewells, vec![a, b]);
    }
}
