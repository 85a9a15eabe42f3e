//! Configuration file handling
//!
//! Everything here can also be given on the command line; CLI flags
//! win over the file.

use crate::protocol::pppoe::{MAX_DISCOVERY_PAYLOAD, TAG_HEADER_SIZE};
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// User configuration (TOML)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ethernet interface to run discovery on
    pub interface: Option<String>,
    /// Requested service name
    pub service_name: Option<String>,
    /// Only accept offers from this access concentrator name
    pub ac_name: Option<String>,
    /// Only accept offers from this MAC address
    pub ac_mac: Option<String>,
    /// Correlator echoed by the AC in every reply
    pub host_uniq: Option<String>,
    /// Initial per-attempt discovery timeout in seconds
    pub timeout: Option<u64>,
    /// Restart discovery forever on timeout
    pub persist: bool,
    pub log: LogConfig,
}

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Reject configurations the driver cannot act on
pub fn validate(config: &Config) -> Result<()> {
    if let Some(0) = config.timeout {
        return Err(Error::Config("timeout must be at least 1 second".into()));
    }

    if let Some(uniq) = &config.host_uniq {
        if uniq.is_empty() {
            return Err(Error::Config("host_uniq must not be empty".into()));
        }
        if TAG_HEADER_SIZE + uniq.len() > MAX_DISCOVERY_PAYLOAD {
            return Err(Error::Config(format!(
                "host_uniq of {} bytes does not fit a discovery packet",
                uniq.len()
            )));
        }
    }

    if let Some(mac) = &config.ac_mac {
        mac.parse::<MacAddr>()
            .map_err(|_| Error::Config(format!("invalid ac_mac '{}'", mac)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config: Config = toml::from_str("interface = \"eth0\"").unwrap();
        assert_eq!(config.interface.as_deref(), Some("eth0"));
        assert_eq!(config.timeout, None);
        assert!(!config.persist);
        assert_eq!(config.log.level, "info");
        validate(&config).unwrap();
    }

    #[test]
    fn test_parse_full() {
        let toml = r#"
            interface = "eth1"
            service_name = "myisp"
            ac_name = "ac-east-1"
            ac_mac = "02:00:00:00:00:07"
            host_uniq = "pid=42"
            timeout = 3
            persist = true

            [log]
            level = "debug"
            format = "json"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.service_name.as_deref(), Some("myisp"));
        assert_eq!(config.timeout, Some(3));
        assert!(config.persist);
        assert_eq!(config.log.format, "json");
        validate(&config).unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config: Config = toml::from_str("timeout = 0").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_mac() {
        let config: Config = toml::from_str("ac_mac = \"not-a-mac\"").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_host_uniq() {
        let config: Config = toml::from_str("host_uniq = \"\"").unwrap();
        assert!(validate(&config).is_err());
    }
}
