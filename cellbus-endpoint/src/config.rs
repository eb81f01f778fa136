//! Endpoint configuration.

use std::time::Duration;

use cellbus_core::{ConfigError, ModuleConfig};

/// Configuration for an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Module name the process identity is derived from.
    pub module_name: String,

    /// Port the inbound socket binds to; also the default port outbound
    /// registrations target when an address carries no explicit port.
    pub port: u16,

    /// Timeout for establishing an outbound TCP connection.
    pub connect_timeout: Duration,

    /// Maximum time to wait for `connection_confirmed` during registration.
    pub handshake_timeout: Duration,

    /// Interval between health probes per registered peer.
    pub health_interval: Duration,

    /// Maximum time to wait for `connection_alive` after a probe.
    pub probe_timeout: Duration,

    /// Frames queued per connection writer before sends fail fast with
    /// `QueueFull`, bounding memory behind a stalled peer.
    pub outbound_queue_depth: usize,
}

impl EndpointConfig {
    /// Create a configuration with default timing parameters.
    pub fn new(module_name: impl Into<String>, port: u16) -> Self {
        Self {
            module_name: module_name.into(),
            port,
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_millis(100),
            health_interval: Duration::from_secs(3),
            probe_timeout: Duration::from_millis(100),
            outbound_queue_depth: 1024,
        }
    }

    /// Read module name and port from the environment
    /// (`CELLBUS_MODULE` / `CELLBUS_PORT`).
    ///
    /// # Errors
    ///
    /// Returns an error if either variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let module = ModuleConfig::from_env()?;
        Ok(Self::new(module.module_name, module.port))
    }

    /// Override the registration handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Override the outbound connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override health probing timing.
    pub fn with_health_probing(mut self, interval: Duration, probe_timeout: Duration) -> Self {
        self.health_interval = interval;
        self.probe_timeout = probe_timeout;
        self
    }

    /// Override the per-connection outbound queue depth.
    pub fn with_outbound_queue_depth(mut self, depth: usize) -> Self {
        self.outbound_queue_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timing() {
        let config = EndpointConfig::new("op_data", 5554);
        assert_eq!(config.health_interval, Duration::from_secs(3));
        assert_eq!(config.probe_timeout, Duration::from_millis(100));
        assert_eq!(config.handshake_timeout, Duration::from_millis(100));
    }

    #[test]
    fn builders_override_fields() {
        let config = EndpointConfig::new("ui", 5554)
            .with_handshake_timeout(Duration::from_millis(250))
            .with_health_probing(Duration::from_millis(500), Duration::from_millis(50))
            .with_outbound_queue_depth(8);
        assert_eq!(config.handshake_timeout, Duration::from_millis(250));
        assert_eq!(config.health_interval, Duration::from_millis(500));
        assert_eq!(config.probe_timeout, Duration::from_millis(50));
        assert_eq!(config.outbound_queue_depth, 8);
    }

    #[test]
    fn from_env_applies_default_timing() {
        use cellbus_core::{MODULE_ENV, PORT_ENV};

        std::env::set_var(MODULE_ENV, "vision");
        std::env::set_var(PORT_ENV, "6001");
        let config = EndpointConfig::from_env().expect("config");
        assert_eq!(config.module_name, "vision");
        assert_eq!(config.port, 6001);
        assert_eq!(config.health_interval, Duration::from_secs(3));
        assert_eq!(config.outbound_queue_depth, 1024);
    }
}
