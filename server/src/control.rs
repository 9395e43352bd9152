//! Control surface for a running server
//!
//! [`ServerHandle`] is what the console, tests and any embedding code use to
//! steer the server. Queries and mutations travel over the command bridge and
//! run on the authoritative loop; the acceptance and whitelist flags are also
//! readable directly without a round trip.

use crate::bridge::CommandBridge;
use crate::client_registry::{ClientSummary, SessionId};
use crate::countdown::MAX_COUNTDOWN_SECS;
use crate::error::{Result, ServerError};
use crate::policy::{Whitelist, WhitelistEntry};
use crate::state::{ServerFlags, ServerState};
use shared::{Packet, MAX_PACKET_SIZE};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

const KICK_REASON: &str = "kicked";

#[derive(Clone)]
pub struct ServerHandle {
    bridge: CommandBridge<ServerState>,
    flags: Arc<ServerFlags>,
}

impl ServerHandle {
    pub(crate) fn new(bridge: CommandBridge<ServerState>, flags: Arc<ServerFlags>) -> Self {
        Self { bridge, flags }
    }

    pub fn is_running(&self) -> bool {
        self.flags.running() && !self.bridge.is_closed()
    }

    /// Asks the authoritative loop to shut down after the current iteration
    pub async fn stop(&self) -> Result<()> {
        self.bridge
            .submit_and_wait(|state| {
                state.request_stop();
                Ok(())
            })
            .await
    }

    /// Snapshot of connected sessions in join order
    pub async fn list_clients(&self) -> Result<Vec<ClientSummary>> {
        self.bridge
            .submit_and_wait(|state| Ok(state.list_clients()))
            .await
    }

    /// Queues a chat line for every connected session
    ///
    /// The text goes out exactly as given.
    pub fn broadcast_message(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(ServerError::validation("message must not be empty"));
        }

        let text = text.to_string();
        ensure_fits(
            "message",
            &Packet::ServerMessage {
                text: text.clone(),
            },
        )?;
        self.bridge.submit(move |state| {
            state.broadcast_message(&text);
            Ok(())
        })
    }

    /// Starts (or restarts) the synchronized countdown
    ///
    /// The pre-commands go out immediately, then one tick per second, then
    /// the post-commands once it reaches zero.
    pub fn start_countdown(
        &self,
        pre_commands: &str,
        post_commands: &str,
        duration_secs: u32,
    ) -> Result<()> {
        if duration_secs == 0 || duration_secs > MAX_COUNTDOWN_SECS {
            return Err(ServerError::validation(format!(
                "countdown duration must be between 1 and {} seconds",
                MAX_COUNTDOWN_SECS
            )));
        }

        let pre_commands = pre_commands.to_string();
        let post_commands = post_commands.to_string();
        let batches = [("pre-commands", &pre_commands), ("post-commands", &post_commands)];
        for (label, commands) in batches {
            let packet = Packet::RunCommands {
                commands: commands.clone(),
            };
            ensure_fits(label, &packet)?;
        }
        self.bridge.submit(move |state| {
            state.start_countdown(pre_commands, post_commands, duration_secs, Instant::now());
            Ok(())
        })
    }

    /// Returns false if no countdown was running
    pub async fn cancel_countdown(&self) -> Result<bool> {
        self.bridge
            .submit_and_wait(|state| Ok(state.cancel_countdown()))
            .await
    }

    pub async fn disconnect_by_name(&self, name: &str) -> Result<usize> {
        let name = required_name(name)?;
        self.bridge
            .submit_and_wait(move |state| Ok(state.disconnect_by_name(&name, KICK_REASON)))
            .await
    }

    pub async fn disconnect_by_id(&self, id: SessionId) -> Result<bool> {
        self.bridge
            .submit_and_wait(move |state| Ok(state.disconnect_by_id(id, KICK_REASON)))
            .await
    }

    /// Bans the address behind a name; returns how many addresses were banned
    pub async fn ban_by_name(&self, name: &str) -> Result<usize> {
        let name = required_name(name)?;
        self.bridge
            .submit_and_wait(move |state| Ok(state.ban_by_name(&name)))
            .await
    }

    pub async fn ban_by_id(&self, id: SessionId) -> Result<bool> {
        self.bridge
            .submit_and_wait(move |state| Ok(state.ban_by_id(id)))
            .await
    }

    pub async fn unban(&self, ip: &str) -> Result<bool> {
        let ip = parse_ip(ip)?;
        self.bridge
            .submit_and_wait(move |state| Ok(state.unban(ip)))
            .await
    }

    pub async fn list_bans(&self) -> Result<Vec<IpAddr>> {
        self.bridge.submit_and_wait(|state| Ok(state.bans())).await
    }

    pub async fn set_accepting_players(&self, value: bool) -> Result<()> {
        self.bridge
            .submit_and_wait(move |state| {
                state.set_accepting_players(value);
                Ok(())
            })
            .await
    }

    pub fn accepting_players(&self) -> bool {
        self.flags.accepting_players()
    }

    pub async fn set_accepting_spectators(&self, value: bool) -> Result<()> {
        self.bridge
            .submit_and_wait(move |state| {
                state.set_accepting_spectators(value);
                Ok(())
            })
            .await
    }

    pub fn accepting_spectators(&self) -> bool {
        self.flags.accepting_spectators()
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.flags.whitelist_enabled()
    }

    pub async fn whitelist(&self) -> Result<Whitelist> {
        self.bridge
            .submit_and_wait(|state| Ok(state.whitelist()))
            .await
    }

    pub async fn set_whitelist_enabled(&self, enabled: bool) -> Result<()> {
        self.bridge
            .submit_and_wait(move |state| {
                state.set_whitelist_enabled(enabled);
                Ok(())
            })
            .await
    }

    /// Returns false if the name was already listed
    pub async fn add_name_to_whitelist(&self, name: &str) -> Result<bool> {
        let entry = WhitelistEntry::Name(required_name(name)?);
        self.bridge
            .submit_and_wait(move |state| Ok(state.add_whitelist_entry(entry)))
            .await
    }

    pub async fn add_ip_to_whitelist(&self, ip: &str) -> Result<bool> {
        let entry = WhitelistEntry::Ip(parse_ip(ip)?);
        self.bridge
            .submit_and_wait(move |state| Ok(state.add_whitelist_entry(entry)))
            .await
    }

    /// Returns false if the name was not listed
    pub async fn remove_name_from_whitelist(&self, name: &str) -> Result<bool> {
        let entry = WhitelistEntry::Name(required_name(name)?);
        self.bridge
            .submit_and_wait(move |state| Ok(state.remove_whitelist_entry(&entry)))
            .await
    }

    pub async fn remove_ip_from_whitelist(&self, ip: &str) -> Result<bool> {
        let entry = WhitelistEntry::Ip(parse_ip(ip)?);
        self.bridge
            .submit_and_wait(move |state| Ok(state.remove_whitelist_entry(&entry)))
            .await
    }
}

/// Rejects payloads whose packet would not fit in one datagram
fn ensure_fits(label: &str, packet: &Packet) -> Result<()> {
    let size = shared::encode(packet)
        .map_err(|e| ServerError::validation(format!("{} cannot be encoded: {}", label, e)))?
        .len();
    if size > MAX_PACKET_SIZE {
        return Err(ServerError::validation(format!(
            "{} too long ({} bytes encoded, limit {})",
            label, size, MAX_PACKET_SIZE
        )));
    }
    Ok(())
}

fn required_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServerError::validation("name must not be empty"));
    }
    Ok(name.to_string())
}

fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.trim()
        .parse()
        .map_err(|_| ServerError::validation(format!("invalid IP address: {:?}", ip)))
}
