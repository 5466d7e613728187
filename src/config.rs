//! Configuration types for the QUIC server.

use crate::error::{ServerError, ServerResult};
use crate::transport::QuicVersion;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of concurrently open peer streams per session.
pub const DEFAULT_MAX_OPEN_STREAMS: usize = 100;

/// Default time a retired connection id stays in time-wait.
pub const DEFAULT_TIME_WAIT_PERIOD: Duration = Duration::from_secs(5);

/// Default growth increment of a stream's header buffer.
pub const DEFAULT_HEADER_BUFFER_INCREMENT: usize = 4096;

/// Maximum QUIC packet size.
pub const MAX_PACKET_SIZE: usize = 1350;

/// Configuration for the QUIC server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum number of concurrently open peer-initiated streams per session
    pub max_open_streams: usize,

    /// How long a closed connection id keeps answering stray packets
    pub time_wait_period: Duration,

    /// Growth increment of a stream's header buffer
    pub header_buffer_increment: usize,

    /// Versions the server accepts new connections for
    pub supported_versions: Vec<QuicVersion>,

    /// Maximum packet size read from the socket
    pub max_packet_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_open_streams: DEFAULT_MAX_OPEN_STREAMS,
            time_wait_period: DEFAULT_TIME_WAIT_PERIOD,
            header_buffer_increment: DEFAULT_HEADER_BUFFER_INCREMENT,
            supported_versions: QuicVersion::all().to_vec(),
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ServerResult<Self> {
        let config: ServerConfig = serde_json::from_str(json).map_err(ServerError::config)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a server.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_open_streams == 0 {
            return Err(ServerError::config("max_open_streams must be positive"));
        }
        if self.header_buffer_increment == 0 {
            return Err(ServerError::config("header_buffer_increment must be positive"));
        }
        if self.time_wait_period.is_zero() {
            return Err(ServerError::config("time_wait_period must be positive"));
        }
        if self.supported_versions.is_empty() {
            return Err(ServerError::config("at least one QUIC version is required"));
        }
        Ok(())
    }

    /// Check whether the server accepts connections for `version`.
    pub fn supports_version(&self, version: QuicVersion) -> bool {
        self.supported_versions.contains(&version)
    }
}

/// Builder for server configuration.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set maximum open streams per session
    pub fn max_open_streams(mut self, max: usize) -> Self {
        self.config.max_open_streams = max;
        self
    }

    /// Set the time-wait period
    pub fn time_wait_period(mut self, period: Duration) -> Self {
        self.config.time_wait_period = period;
        self
    }

    /// Set the header buffer growth increment
    pub fn header_buffer_increment(mut self, increment: usize) -> Self {
        self.config.header_buffer_increment = increment;
        self
    }

    /// Set the supported versions
    pub fn supported_versions(mut self, versions: Vec<QuicVersion>) -> Self {
        self.config.supported_versions = versions;
        self
    }

    /// Set maximum packet size
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_open_streams, 100);
        assert_eq!(config.time_wait_period, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .max_open_streams(3)
            .time_wait_period(Duration::from_millis(500))
            .supported_versions(vec![QuicVersion::Q023])
            .build();

        assert_eq!(config.max_open_streams, 3);
        assert!(config.supports_version(QuicVersion::Q023));
        assert!(!config.supports_version(QuicVersion::Q018));
    }

    #[test]
    fn test_from_json_partial() {
        let config = ServerConfig::from_json(r#"{ "max_open_streams": 7 }"#).unwrap();
        assert_eq!(config.max_open_streams, 7);
        assert_eq!(config.time_wait_period, DEFAULT_TIME_WAIT_PERIOD);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let result = ServerConfig::from_json(r#"{ "max_open_streams": 0 }"#);
        assert!(matches!(result, Err(ServerError::Config(_))));

        let result = ServerConfig::from_json("not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_versions() {
        let config = ServerConfig::builder()
            .supported_versions(vec![QuicVersion::Q021, QuicVersion::Q023])
            .build();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ServerConfig::from_json(&json).unwrap(), config);
    }
}
