//! # Ghost Server Library
//!
//! This library provides the server core for ghost multiplayer sessions. Game
//! clients report in over UDP, and the server keeps the authoritative list of
//! who is connected, decides who may join, and relays operator actions such as
//! messages, kicks, bans and synchronized countdowns to every session.
//!
//! ## Core Responsibilities
//!
//! ### Session Tracking
//! Every admitted client gets a session id that is never reused while the
//! process lives. Sessions end on request, on kick or ban, on timeout, or when
//! the server stops. Recently departed sessions are remembered so operators
//! can still ban someone who has just left.
//!
//! ### Admission Policy
//! Incoming connections pass a fixed sequence of checks: protocol version,
//! ban list, whitelist (when enabled), the acceptance flag for players or
//! spectators, and finally capacity. A refused client is told why.
//!
//! ### Operator Control
//! Operators steer the server through a [`control::ServerHandle`]. Every
//! operation runs on the authoritative loop, in the order it was submitted.
//!
//! ## Architecture Design
//!
//! ### Single Authoritative Loop
//! All mutable state lives in one task. Network packets, timer ticks and
//! operator operations are interleaved there, so session and policy data are
//! never locked. Other threads reach that state only through the command
//! bridge, and read a handful of flags through atomics.
//!
//! ### Command Bridge
//! [`bridge::CommandBridge`] is a multi-producer queue of closures. Callers
//! may fire and forget, or wait for the result. The loop drains the queue on
//! every iteration, so a waiting caller is answered within one loop turn.
//!
//! ## Module Organization
//!
//! ### Client Registry (`client_registry`)
//! - Session creation, lookup by id, name, address or IP
//! - Departed-session history for late bans
//! - Timeout detection
//!
//! ### Policy (`policy`)
//! - Ban list and whitelist (names and IPs)
//! - Admission checks and refusal reasons
//!
//! ### Countdown (`countdown`)
//! - One-second countdown with pre- and post-command payloads
//!
//! ### Bridge, State and Control (`bridge`, `state`, `control`)
//! - Cross-thread operation queue
//! - The state owned by the authoritative loop
//! - The public control surface
//!
//! ### Network (`network`)
//! - UDP receiver and sender tasks
//! - Server start/stop lifecycle
//!
//! ### Console (`console`)
//! - Text commands for operators, snapshots as JSON
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default());
//!     let address = server.start().await?;
//!     println!("players connect to {}", address);
//!
//!     let handle = server.handle()?;
//!     handle.broadcast_message("welcome")?;
//!     handle.start_countdown("echo ready", "echo go", 5)?;
//!
//!     for client in handle.list_clients().await? {
//!         println!("{} {}", client.id, client.name);
//!     }
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod bridge;
pub mod client_registry;
pub mod config;
pub mod console;
pub mod control;
pub mod countdown;
pub mod error;
pub mod network;
pub mod policy;
pub mod state;
