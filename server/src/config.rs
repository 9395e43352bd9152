//! Server configuration and defaults

use std::time::Duration;

/// Port the ghost server listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 53000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface the UDP socket binds to
    pub bind_host: String,
    pub port: u16,
    /// Authoritative loop ticks per second
    pub tick_rate: u32,
    /// Maximum number of concurrent sessions
    pub max_clients: usize,
    /// Silence after which a session is dropped
    pub client_timeout: Duration,
    /// Address reported back from `start`, overriding detection
    pub public_address: Option<String>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_rate: 20,
            max_clients: 32,
            client_timeout: Duration::from_secs(5),
            public_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_default_bind_address_parses() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:53000");
        assert!(config.bind_address().parse::<SocketAddr>().is_ok());
    }

    #[test]
    fn test_tick_duration_validation() {
        let mut config = ServerConfig::default();
        assert_eq!(config.tick_duration(), Duration::from_millis(50));

        config.tick_rate = 0;
        assert_eq!(config.tick_duration(), Duration::from_secs(1));
    }
}
