use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind both listeners to
    pub bind_address: IpAddr,
    /// Reliable (TCP) port
    pub tcp_port: u16,
    /// Position-channel (UDP) port
    pub udp_port: u16,
    /// Maximum number of concurrent lobbies
    pub max_lobbies: usize,
    /// Optional append-only result log on disk
    pub result_log_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            tcp_port: 5175,
            udp_port: 5176,
            max_lobbies: 100,
            result_log_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("TCP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.tcp_port = parsed;
                } else {
                    tracing::warn!("TCP_PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid TCP_PORT '{}', using default", port);
            }
        }

        if let Ok(port) = std::env::var("UDP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.udp_port = parsed;
                } else {
                    tracing::warn!("UDP_PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid UDP_PORT '{}', using default", port);
            }
        }

        if let Ok(max_lobbies) = std::env::var("MAX_LOBBIES") {
            if let Ok(parsed) = max_lobbies.parse::<usize>() {
                if parsed > 0 && parsed <= 10000 {
                    config.max_lobbies = parsed;
                } else {
                    tracing::warn!("MAX_LOBBIES must be 1-10000, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_LOBBIES '{}', using default", max_lobbies);
            }
        }

        if let Ok(path) = std::env::var("RESULT_LOG_PATH") {
            config.result_log_path = Some(PathBuf::from(path));
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tcp_port == 0 || self.udp_port == 0 {
            return Err("Ports cannot be 0".to_string());
        }
        if self.tcp_port == self.udp_port {
            return Err("TCP and UDP ports must differ".to_string());
        }
        if self.max_lobbies == 0 {
            return Err("max_lobbies must be at least 1".to_string());
        }
        Ok(())
    }
}
