//! Server network layer: UDP I/O tasks and the authoritative loop
//!
//! Three tasks run while the server is up:
//! - **Network receiver**: decodes datagrams and forwards them to the loop
//! - **Network sender**: drains the outbound queue onto the socket
//! - **Authoritative loop**: owns [`ServerState`], applies packets, runs bridged
//!   operations and ticks timers
//!
//! Only the authoritative loop ever touches session or policy state.

use crate::address::{AddressResolver, DefaultResolver};
use crate::bridge::{self, CommandQueue};
use crate::config::ServerConfig;
use crate::control::ServerHandle;
use crate::error::{Result, ServerError};
use crate::policy::BanWhitelistPolicy;
use crate::state::{Outbound, ServerFlags, ServerState};
use log::{debug, error, info, warn};
use shared::{Packet, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// A decoded packet handed from the receiver to the authoritative loop
#[derive(Debug)]
pub struct Datagram {
    pub packet: Packet,
    pub addr: SocketAddr,
}

/// Everything that exists only while the server is started
struct Running {
    handle: ServerHandle,
    local_addr: SocketAddr,
    public_address: String,
    authority: JoinHandle<BanWhitelistPolicy>,
    receiver: JoinHandle<()>,
    sender: JoinHandle<()>,
}

/// Owns the server's start/stop lifecycle
///
/// Constructing a `Server` does not touch the network; [`Server::start`] binds
/// the socket and spawns the tasks, and [`Server::stop`] tears them down again.
/// Bans, the whitelist and the acceptance flags carry over from one run to the
/// next; sessions and any countdown do not.
pub struct Server {
    config: ServerConfig,
    resolver: Box<dyn AddressResolver>,
    /// Held here between runs, lent to the authoritative loop while running
    policy: BanWhitelistPolicy,
    flags: Arc<ServerFlags>,
    running: Option<Running>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let resolver = DefaultResolver::new(config.public_address.clone());
        Self::with_resolver(config, Box::new(resolver))
    }

    pub fn with_resolver(config: ServerConfig, resolver: Box<dyn AddressResolver>) -> Self {
        Self {
            config,
            resolver,
            policy: BanWhitelistPolicy::new(),
            flags: Arc::new(ServerFlags::new()),
            running: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Changes the port used by the next [`start`](Self::start)
    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.handle.is_running())
    }

    /// Control handle for the running server
    pub fn handle(&self) -> Result<ServerHandle> {
        self.running
            .as_ref()
            .map(|running| running.handle.clone())
            .ok_or(ServerError::NotRunning)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn public_address(&self) -> Option<&str> {
        self.running
            .as_ref()
            .map(|running| running.public_address.as_str())
    }

    /// Binds the socket, spawns the server tasks and returns the public address
    pub async fn start(&mut self) -> Result<String> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        // A loop that ended on its own still has tasks to reap
        if self.running.is_some() {
            self.stop().await?;
        }

        let bind_address = self.config.bind_address();
        let socket = UdpSocket::bind(&bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_address.clone(),
                source,
            })?;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;
        let public_address = self.resolver.public_address(local_addr);
        info!(
            "Server listening on {} (public address {})",
            local_addr, public_address
        );

        let flags = Arc::clone(&self.flags);
        flags.set_running(true);

        let (datagram_tx, datagram_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (bridge, queue) = bridge::channel();

        let receiver = spawn_network_receiver(Arc::clone(&socket), datagram_tx);
        let sender = spawn_network_sender(socket, outbound_rx);

        let authority = AuthoritativeLoop {
            state: ServerState::new(
                &self.config,
                std::mem::take(&mut self.policy),
                Arc::clone(&flags),
                outbound_tx,
            ),
            queue,
            datagrams: datagram_rx,
            tick_duration: self.config.tick_duration(),
            flags: Arc::clone(&flags),
        };
        let authority = tokio::spawn(authority.run());

        self.running = Some(Running {
            handle: ServerHandle::new(bridge, flags),
            local_addr,
            public_address: public_address.clone(),
            authority,
            receiver,
            sender,
        });

        Ok(public_address)
    }

    /// Stops the authoritative loop, says goodbye to every session and
    /// releases the socket. Stopping a stopped server does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        if let Err(e) = running.handle.stop().await {
            debug!("Stop request not delivered: {}", e);
        }

        match running.authority.await {
            Ok(policy) => self.policy = policy,
            Err(e) => {
                error!("Authoritative loop panicked, bans and whitelist lost: {}", e);
                self.policy = BanWhitelistPolicy::new();
                self.flags = Arc::new(ServerFlags::new());
            }
        }

        // The sender finishes once the loop has dropped its outbound queue,
        // which flushes the farewell packets
        if let Err(e) = running.sender.await {
            error!("Network sender panicked: {}", e);
        }

        running.receiver.abort();
        let _ = running.receiver.await;

        info!("Server stopped");
        Ok(())
    }
}

struct AuthoritativeLoop {
    state: ServerState,
    queue: CommandQueue<ServerState>,
    datagrams: mpsc::UnboundedReceiver<Datagram>,
    tick_duration: Duration,
    flags: Arc<ServerFlags>,
}

impl AuthoritativeLoop {
    /// Runs until a stop is requested and hands back the admission policy
    async fn run(mut self) -> BanWhitelistPolicy {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                datagram = self.datagrams.recv() => {
                    match datagram {
                        Some(Datagram { packet, addr }) => self.state.handle_packet(packet, addr),
                        None => {
                            error!("Network receiver stopped unexpectedly");
                            self.state.request_stop();
                        }
                    }
                },

                op = self.queue.recv() => {
                    match op {
                        Some(op) => op.run(&mut self.state),
                        None => {
                            info!("All control handles dropped");
                            self.state.request_stop();
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.state.tick(Instant::now());
                },
            }

            // Drained on every iteration so waiting callers are never starved
            self.queue.drain(&mut self.state);

            if self.state.stop_requested() {
                break;
            }
        }

        info!("Server shutting down");
        self.flags.set_running(false);
        self.state.shutdown();

        // Late submissions are refused; anything already queued still runs
        self.queue.close();
        self.queue.drain(&mut self.state);

        self.state.into_policy()
    }
}

/// Spawns task that continuously listens for incoming packets
fn spawn_network_receiver(
    socket: Arc<UdpSocket>,
    datagram_tx: mpsc::UnboundedSender<Datagram>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => match shared::decode(&buffer[..len]) {
                    Ok(packet) if packet.is_server_bound() => {
                        if datagram_tx.send(Datagram { packet, addr }).is_err() {
                            debug!("Authoritative loop gone, receiver exiting");
                            break;
                        }
                    }
                    Ok(packet) => {
                        warn!("Ignoring client-bound packet {:?} from {}", packet, addr);
                    }
                    Err(_) => {
                        warn!("Failed to deserialize packet from {}", addr);
                    }
                },
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

/// Spawns task that processes the outgoing packet queue
fn spawn_network_sender(
    socket: Arc<UdpSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match message {
                Outbound::SendPacket { packet, addr } => {
                    if let Err(e) = send_packet(&socket, &packet, addr).await {
                        error!("Failed to send packet to {}: {}", addr, e);
                    }
                }
                Outbound::BroadcastPacket { packet, recipients } => {
                    let data = match shared::encode(&packet) {
                        Ok(data) => data,
                        Err(e) => {
                            error!("Failed to serialize broadcast packet: {}", e);
                            continue;
                        }
                    };

                    for addr in recipients {
                        if let Err(e) = socket.send_to(&data, addr).await {
                            error!("Failed to send to {}: {}", addr, e);
                        }
                    }
                }
            }
        }
    })
}

async fn send_packet(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let data = shared::encode(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}
