use clap::Parser;
use shared::{Packet, HEARTBEAT_INTERVAL_SECS, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, Duration, Instant};

/// Headless client that joins a ghost server and prints what it receives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:53000")]
    server: SocketAddr,

    /// Name to join with
    #[arg(short, long, default_value = "test-bot")]
    name: String,

    /// Join as a spectator
    #[arg(long)]
    spectator: bool,

    /// Seconds to stay connected
    #[arg(short, long, default_value = "30")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let connect_packet = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        name: args.name.clone(),
        spectator: args.spectator,
    };
    println!("Sending connection request to {}", args.server);
    socket
        .send_to(&shared::encode(&connect_packet)?, args.server)
        .await?;

    let mut buf = [0u8; MAX_PACKET_SIZE];
    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let deadline = sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let started = Instant::now();

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match shared::decode(&buf[..len]) {
                    Ok(Packet::Connected { client_id }) => {
                        println!("Connection accepted with client ID: {}", client_id);
                    }
                    Ok(Packet::Disconnected { reason }) => {
                        println!("Disconnected by server: {}", reason);
                        return Ok(());
                    }
                    Ok(Packet::Countdown { remaining }) => println!("Countdown: {}", remaining),
                    Ok(Packet::RunCommands { commands }) => println!("Run commands: {}", commands),
                    Ok(Packet::ServerMessage { text }) => println!("Server: {}", text),
                    Ok(other) => println!("Received packet: {:?}", other),
                    Err(e) => println!("Failed to deserialize packet: {}", e),
                }
            }
            _ = heartbeat.tick() => {
                socket.send_to(&shared::encode(&Packet::Heartbeat)?, args.server).await?;
            }
            _ = &mut deadline => break,
        }
    }

    println!("Sending disconnect after {:.1}s", started.elapsed().as_secs_f32());
    socket
        .send_to(&shared::encode(&Packet::Disconnect)?, args.server)
        .await?;

    println!("Test client finished");
    Ok(())
}
