//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::parser::BodyOptions;
use crate::server::error::Error;

/// HTTP server configuration.
///
/// Deserializes from JSON with camelCase keys; every key is optional.
///
/// ```
/// use localserve::ServerConfig;
///
/// let config = ServerConfig::from_json_str(r#"{"port": 9000, "maxBodyBytes": 1048576}"#).unwrap();
/// assert_eq!(config.port, 9000);
/// assert_eq!(config.max_body_bytes, 1_048_576);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    /// The address to bind to.
    pub host: IpAddr,
    /// The port to listen on.
    pub port: u16,
    /// The maximum number of concurrent connections.
    pub max_connections: usize,
    /// Seconds a connection may stay silent while a read is pending.
    pub read_timeout_seconds: u64,
    /// Largest accepted request head (start line and headers).
    pub max_header_bytes: usize,
    /// Largest accepted request body.
    pub max_body_bytes: u64,
    /// Where the uploader stores files.
    pub upload_root_directory: PathBuf,
    /// Where bodies streamed to disk are staged. Defaults to the system temp directory.
    pub temp_directory: Option<PathBuf>,
    /// Seconds to wait for in-flight connections on shutdown.
    pub drain_timeout_seconds: u64,
    /// The read buffer size.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            max_connections: 1024,
            read_timeout_seconds: 30,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
            upload_root_directory: PathBuf::from("uploads"),
            temp_directory: None,
            drain_timeout_seconds: 30,
            read_buffer_size: 8192,
        }
    }
}

impl ServerConfig {
    /// Parse a JSON configuration and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: ServerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject limits that would make the server unusable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(Error::Config("maxConnections must be at least 1".to_string()));
        }
        if self.max_connections > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::Config("maxConnections is too large".to_string()));
        }
        if self.read_timeout_seconds == 0 {
            return Err(Error::Config("readTimeoutSeconds must be at least 1".to_string()));
        }
        if self.max_header_bytes < 64 {
            return Err(Error::Config("maxHeaderBytes must be at least 64".to_string()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::Config("readBufferSize must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The socket address to bind.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    /// Body limits derived from this configuration.
    pub fn body_options(&self) -> BodyOptions {
        BodyOptions {
            max_body_bytes: self.max_body_bytes,
            temp_dir: self.temp_directory.clone().unwrap_or_else(std::env::temp_dir),
        }
    }
}
