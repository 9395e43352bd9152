use serde::{Deserialize, Serialize};

/// Protocol revision a client must announce in [`Packet::Connect`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side will send or accept.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Seconds between heartbeats a well-behaved client sends.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_version: u32,
        name: String,
        spectator: bool,
    },
    Heartbeat,
    Rename {
        name: String,
    },
    Disconnect,

    Connected {
        client_id: u32,
    },
    Disconnected {
        reason: String,
    },
    ServerMessage {
        text: String,
    },
    Countdown {
        remaining: u32,
    },
    RunCommands {
        commands: String,
    },
    PlayerJoined {
        client_id: u32,
        name: String,
        spectator: bool,
    },
    PlayerLeft {
        client_id: u32,
    },
}

impl Packet {
    /// True for packets a client sends to the server.
    pub fn is_server_bound(&self) -> bool {
        matches!(
            self,
            Packet::Connect { .. } | Packet::Heartbeat | Packet::Rename { .. } | Packet::Disconnect
        )
    }
}

pub fn encode(packet: &Packet) -> bincode::Result<Vec<u8>> {
    bincode::serialize(packet)
}

pub fn decode(bytes: &[u8]) -> bincode::Result<Packet> {
    bincode::deserialize(bytes)
}
