//! Server configuration.

use clap::Parser;
use std::time::Duration;

use undebate_proto::framing::MAX_MESSAGE_SIZE;

/// Default TCP address for the server.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:3011";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Default maximum inbound frame size (4 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = MAX_MESSAGE_SIZE;

/// Default server identifier reported in the handshake.
pub const DEFAULT_SERVER_ID: &str = "undebate-server";

/// Undebate server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address to bind to (e.g., "0.0.0.0:3011").
    pub listen_address: String,

    /// Socket-api calls slower than this are logged.
    pub request_timeout: Duration,

    /// Time a new connection has to send its handshake.
    pub handshake_timeout: Duration,

    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,

    /// Identifier reported to clients in the handshake.
    pub server_id: String,
}

impl ServerConfig {
    /// Create a new server configuration listening on the given address.
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            server_id: DEFAULT_SERVER_ID.to_string(),
        }
    }

    /// Set the listen address.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the maximum message size, capped at the protocol limit.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    /// Set the server identifier.
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    /// Check the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.listen_address.is_empty() {
            return Err(crate::Error::Config("listen address is empty".to_string()));
        }
        if self.max_message_size == 0 {
            return Err(crate::Error::Config("max message size must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDRESS)
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "undebate-server")]
#[command(version, about = "Undebate socket-api server", long_about = None)]
pub struct Args {
    /// TCP address to bind to.
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Handshake timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    pub handshake_timeout: u64,

    /// Maximum message size in megabytes.
    #[arg(long, default_value_t = 4)]
    pub max_message_mb: usize,

    /// Server identifier reported to clients.
    #[arg(long, default_value = DEFAULT_SERVER_ID)]
    pub server_id: String,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig::new(self.listen)
            .with_request_timeout(Duration::from_secs(self.timeout))
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout))
            .with_max_message_size(self.max_message_mb.saturating_mul(1024 * 1024))
            .with_server_id(self.server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.server_id, DEFAULT_SERVER_ID);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new("127.0.0.1:0")
            .with_request_timeout(Duration::from_secs(60))
            .with_handshake_timeout(Duration::from_secs(2))
            .with_max_message_size(1024)
            .with_server_id("ssp-1");

        assert_eq!(config.listen_address, "127.0.0.1:0");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.server_id, "ssp-1");
    }

    #[test]
    fn test_invalid_config() {
        assert!(ServerConfig::new("").validate().is_err());
        assert!(ServerConfig::default()
            .with_max_message_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "undebate-server",
            "--listen",
            "127.0.0.1:4000",
            "--timeout",
            "5",
            "--max-message-mb",
            "1",
            "--server-id",
            "test",
        ]);
        let config = args.into_config();

        assert_eq!(config.listen_address, "127.0.0.1:4000");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.server_id, "test");
    }

    #[test]
    fn test_args_message_size_capped() {
        let config = Args::parse_from(["undebate-server", "--max-message-mb", "64"]).into_config();
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }
}
