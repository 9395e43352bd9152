//! Resolution of the address players should be told to connect to

use std::net::{SocketAddr, UdpSocket};

/// Reports the externally reachable address once the server is bound
pub trait AddressResolver: Send + Sync {
    fn public_address(&self, bound: SocketAddr) -> String;
}

/// Uses a configured address when given, otherwise the outward-facing
/// interface address the OS would route through
#[derive(Debug, Clone, Default)]
pub struct DefaultResolver {
    configured: Option<String>,
}

impl DefaultResolver {
    pub fn new(configured: Option<String>) -> Self {
        Self { configured }
    }

    /// Connecting a UDP socket only selects a route; nothing is sent
    fn outward_ip() -> Option<std::net::IpAddr> {
        let probe = UdpSocket::bind("0.0.0.0:0").ok()?;
        probe.connect("8.8.8.8:80").ok()?;
        probe.local_addr().ok().map(|addr| addr.ip())
    }
}

impl AddressResolver for DefaultResolver {
    fn public_address(&self, bound: SocketAddr) -> String {
        if let Some(configured) = &self.configured {
            return configured.clone();
        }

        if !bound.ip().is_unspecified() {
            return bound.to_string();
        }

        match Self::outward_ip() {
            Some(ip) => SocketAddr::new(ip, bound.port()).to_string(),
            None => bound.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_address_wins() {
        let resolver = DefaultResolver::new(Some("ghost.example.org:53000".to_string()));
        let bound: SocketAddr = "0.0.0.0:53000".parse().unwrap();
        assert_eq!(resolver.public_address(bound), "ghost.example.org:53000");
    }

    #[test]
    fn test_specific_bind_address_is_reported() {
        let resolver = DefaultResolver::default();
        let bound: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(resolver.public_address(bound), "127.0.0.1:4000");
    }

    #[test]
    fn test_unspecified_bind_keeps_port() {
        let resolver = DefaultResolver::default();
        let bound: SocketAddr = "0.0.0.0:4001".parse().unwrap();
        assert!(resolver.public_address(bound).ends_with(":4001"));
    }
}
