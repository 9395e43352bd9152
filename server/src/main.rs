use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, DEFAULT_PORT};
use server::console::{Console, CountdownSettings, Outcome};
use server::network::Server;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to bind the UDP socket to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Authoritative loop ticks per second
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// Address to report to players instead of the detected one
    #[arg(long)]
    public_address: Option<String>,

    /// Wait for a `start` command instead of starting immediately
    #[arg(long)]
    no_autostart: bool,

    /// Commands sent to clients when a countdown starts
    #[arg(long, default_value = "")]
    countdown_pre: String,

    /// Commands sent to clients when a countdown finishes
    #[arg(long, default_value = "")]
    countdown_post: String,

    /// Countdown length in seconds
    #[arg(long, default_value = "1")]
    countdown_duration: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_host: args.host,
        port: args.port,
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.timeout_secs),
        public_address: args.public_address,
    };
    let settings = CountdownSettings {
        pre_commands: args.countdown_pre,
        post_commands: args.countdown_post,
        duration: args.countdown_duration,
    };

    let mut console = Console::new(Server::new(config), settings);

    if !args.no_autostart {
        match console.execute_line("start").await {
            Ok(Outcome::Reply(reply)) => println!("{}", reply),
            Ok(Outcome::Quit) => {}
            Err(e) => {
                error!("Failed to start server: {}", e);
                return Err(e.into());
            }
        }
    }

    info!("Console ready, type `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Console input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match console.execute_line(&line).await {
                    Ok(Outcome::Reply(reply)) => println!("{}", reply),
                    Ok(Outcome::Quit) => break,
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    console.shutdown().await?;
    Ok(())
}
