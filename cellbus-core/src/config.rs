//! Environment-driven module configuration.

/// Environment variable holding the module name used to derive the identity.
pub const MODULE_ENV: &str = "CELLBUS_MODULE";

/// Environment variable holding the port all bus communication happens on.
pub const PORT_ENV: &str = "CELLBUS_PORT";

/// Startup configuration shared by every module on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Module name, e.g. `op_data` or `ui`. The process identity is derived
    /// from it at startup.
    pub module_name: String,
    /// Port the inbound socket binds to and outbound connections target.
    pub port: u16,
}

impl ModuleConfig {
    /// Build a configuration from explicit values.
    pub fn new(module_name: impl Into<String>, port: u16) -> Self {
        Self {
            module_name: module_name.into(),
            port,
        }
    }

    /// Read the configuration from `CELLBUS_MODULE` and `CELLBUS_PORT`.
    ///
    /// # Errors
    ///
    /// Returns an error if either variable is missing or the port does not
    /// parse as a `u16`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let module_name =
            std::env::var(MODULE_ENV).map_err(|_| ConfigError::MissingVar(MODULE_ENV))?;
        if module_name.is_empty() {
            return Err(ConfigError::MissingVar(MODULE_ENV));
        }
        let port_raw = std::env::var(PORT_ENV).map_err(|_| ConfigError::MissingVar(PORT_ENV))?;
        let port = port_raw
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port_raw))?;
        Ok(Self { module_name, port })
    }
}

/// Error reading the module configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    /// The configured port is not a valid `u16`.
    #[error("invalid port value: {0}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config() {
        let config = ModuleConfig::new("op_data", 5554);
        assert_eq!(config.module_name, "op_data");
        assert_eq!(config.port, 5554);
    }

    // One test for every environment case: the variables are process-global,
    // so splitting these up would race under the parallel test runner.
    #[test]
    fn from_env_reads_and_validates() {
        std::env::set_var(MODULE_ENV, "op_data");
        std::env::set_var(PORT_ENV, "5554");
        assert_eq!(
            ModuleConfig::from_env().expect("config"),
            ModuleConfig::new("op_data", 5554)
        );

        std::env::set_var(PORT_ENV, "70000");
        assert_eq!(
            ModuleConfig::from_env(),
            Err(ConfigError::InvalidPort("70000".to_string()))
        );

        std::env::remove_var(PORT_ENV);
        assert_eq!(ModuleConfig::from_env(), Err(ConfigError::MissingVar(PORT_ENV)));

        std::env::remove_var(MODULE_ENV);
        assert_eq!(
            ModuleConfig::from_env(),
            Err(ConfigError::MissingVar(MODULE_ENV))
        );
    }
}
