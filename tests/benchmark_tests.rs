//! Performance benchmarks for the server's hot paths

use server::bridge;
use server::client_registry::ClientRegistry;
use server::policy::{BanWhitelistPolicy, WhitelistEntry};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

fn ip(n: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(0x0A00_0000 + n))
}

/// Benchmarks fire-and-forget submissions drained by a single owner
#[test]
fn benchmark_bridge_submit_and_drain() {
    let (bridge, mut queue) = bridge::channel::<u64>();
    let producers = 4;
    let per_producer = 25_000;

    let start = Instant::now();

    let handles: Vec<_> = (0..producers)
        .map(|_| {
            let bridge = bridge.clone();
            thread::spawn(move || {
                for _ in 0..per_producer {
                    bridge
                        .submit(|counter| {
                            *counter += 1;
                            Ok(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut counter = 0u64;
    while queue.drain(&mut counter) > 0 {}

    let duration = start.elapsed();
    let total = producers * per_producer;
    println!(
        "Bridge: {} operations in {:?} ({:.2} μs/op)",
        total,
        duration,
        duration.as_micros() as f64 / total as f64
    );

    assert_eq!(counter, total as u64);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks request/response round trips through a running consumer
#[test]
fn benchmark_bridge_round_trips() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let (bridge, mut queue) = bridge::channel::<Vec<u32>>();
    let consumer = runtime.spawn(async move {
        let mut state = Vec::new();
        while let Some(op) = queue.recv().await {
            op.run(&mut state);
            queue.drain(&mut state);
        }
        state.len()
    });

    let iterations = 5_000;
    let start = Instant::now();

    runtime.block_on(async {
        for i in 0..iterations {
            let len = bridge
                .submit_and_wait(move |state| {
                    state.push(i);
                    Ok(state.len())
                })
                .await
                .unwrap();
            assert_eq!(len, i as usize + 1);
        }
    });

    let duration = start.elapsed();
    println!(
        "Bridge round trips: {} in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    drop(bridge);
    assert_eq!(runtime.block_on(consumer).unwrap(), iterations as usize);
    assert!(duration.as_millis() < 3000);
}

/// Benchmarks admission checks against large ban and whitelist sets
#[test]
fn benchmark_policy_checks() {
    let mut policy = BanWhitelistPolicy::new();
    for n in 0..10_000 {
        policy.ban(ip(n));
    }
    for n in 10_000..20_000 {
        policy.add_entry(WhitelistEntry::Ip(ip(n)));
        policy.add_entry(WhitelistEntry::Name(format!("player-{}", n)));
    }
    policy.set_whitelist_enabled(true);

    let iterations = 100_000u32;
    let start = Instant::now();

    let mut admitted = 0;
    for i in 0..iterations {
        let n = i % 30_000;
        if policy.admits(ip(n), "player-unknown") {
            admitted += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Policy checks: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Only the whitelisted, unbanned range gets in
    assert!(admitted > 0 && admitted < iterations);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks registry lookups used by every incoming packet
#[test]
fn benchmark_registry_lookups() {
    let mut registry = ClientRegistry::new();
    let addrs: Vec<SocketAddr> = (0..256)
        .map(|n| SocketAddr::new(ip(n), 40_000 + n as u16))
        .collect();
    for (n, addr) in addrs.iter().enumerate() {
        registry.connect(*addr, &format!("p{}", n), n % 4 == 0);
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let addr = addrs[i % addrs.len()];
        assert!(registry.find_by_addr(addr).is_some());
    }

    let duration = start.elapsed();
    println!(
        "Registry lookups: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );
    assert!(duration < Duration::from_secs(2));
}

/// Benchmarks packet codec for the packets the server sends most
#[test]
fn benchmark_packet_serialization() {
    let packets = vec![
        Packet::Connect {
            client_version: PROTOCOL_VERSION,
            name: "benchmark-player".to_string(),
            spectator: false,
        },
        Packet::Heartbeat,
        Packet::Countdown { remaining: 10 },
        Packet::RunCommands {
            commands: "sv_cheats 1; ghost_sync 1; echo go".repeat(8),
        },
    ];

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        for packet in &packets {
            let serialized = shared::encode(packet).unwrap();
            let _deserialized = shared::decode(&serialized).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests a full server with many clients joining at once
#[test]
fn stress_test_many_clients_join() {
    use server::config::ServerConfig;
    use server::network::Server;
    use tokio::net::UdpSocket;

    tokio_test::block_on(async {
        let mut server = Server::new(ServerConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            max_clients: 64,
            ..ServerConfig::default()
        });
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle().unwrap();

        let start = Instant::now();
        let mut sockets = Vec::new();
        for n in 0..64 {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let connect = shared::encode(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
                name: format!("bot-{}", n),
                spectator: false,
            })
            .unwrap();
            socket.send_to(&connect, addr).await.unwrap();
            sockets.push(socket);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let connected = handle.list_clients().await.unwrap().len();
            if connected == 64 {
                break;
            }
            assert!(Instant::now() < deadline, "only {} clients joined", connected);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        println!("64 clients joined in {:?}", start.elapsed());
        server.stop().await.unwrap();
    });
}
