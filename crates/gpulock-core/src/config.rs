//! Configuration types for gpulock

use crate::{GpulockError, GpulockResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Store used when none is configured
pub const DEFAULT_STORE: &str = "redis+unix:///var/run/redis/redis-server.sock";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpulockConfig {
    /// Lock store endpoints
    pub stores: Vec<String>,
    /// Lease time-to-live in milliseconds
    pub ttl_ms: u64,
    /// Shuffle idle candidates before trying them
    pub shuffle: bool,
    /// Bound on a single store round-trip in milliseconds
    pub store_timeout_ms: u64,
    /// Bound on opening a store connection in milliseconds
    pub connect_timeout_ms: u64,
    /// Fraction of the ttl reserved for clock drift between hosts
    pub clock_drift_factor: f64,
    /// Overall bound on one selection in milliseconds
    pub acquire_deadline_ms: Option<u64>,
    /// Host identity used in lock keys (detected when unset)
    pub host: Option<String>,
    /// Probe configuration
    pub probe: ProbeConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for GpulockConfig {
    fn default() -> Self {
        Self {
            stores: vec![DEFAULT_STORE.to_string()],
            ttl_ms: 10_000,
            shuffle: true,
            store_timeout_ms: 50,
            connect_timeout_ms: 1_000,
            clock_drift_factor: 0.01,
            acquire_deadline_ms: None,
            host: None,
            probe: ProbeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GpulockConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> GpulockResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GpulockError::Config(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| GpulockError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the settings that would make every acquisition fail
    pub fn validate(&self) -> GpulockResult<()> {
        if self.stores.is_empty() {
            return Err(GpulockError::StoreConfiguration {
                configured: 0,
                required: 1,
            });
        }
        if self.ttl_ms == 0 {
            return Err(GpulockError::Config("ttl_ms must be positive".to_string()));
        }
        if self.store_timeout_ms >= self.ttl_ms {
            return Err(GpulockError::Config(format!(
                "store_timeout_ms ({}) must be smaller than ttl_ms ({})",
                self.store_timeout_ms, self.ttl_ms
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(GpulockError::Config(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.clock_drift_factor) {
            return Err(GpulockError::Config(format!(
                "clock_drift_factor must be in [0, 1), got {}",
                self.clock_drift_factor
            )));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn acquire_deadline(&self) -> Option<Duration> {
        self.acquire_deadline_ms.map(Duration::from_millis)
    }

    /// Host identity for lock keys
    ///
    /// Falls back to `HOSTNAME`, then `/etc/hostname`, then "localhost".
    pub fn host_identity(&self) -> String {
        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            return host.to_string();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// How to obtain the GPU process snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe executable
    pub command: String,
    /// Arguments to the probe
    pub args: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: "nvidia-smi".to_string(),
            args: vec!["pmon".to_string(), "-c".to_string(), "1".to_string()],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GpulockConfig::default();
        assert_eq!(config.stores, vec![DEFAULT_STORE.to_string()]);
        assert_eq!(config.ttl(), Duration::from_millis(10_000));
        assert!(config.shuffle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_parse() {
        let toml_str = r#"
stores = ["redis://10.0.0.1:6379", "redis://10.0.0.2:6379", "redis://10.0.0.3:6379"]
ttl_ms = 30000
shuffle = false

[probe]
command = "/usr/bin/nvidia-smi"
"#;
        let config: GpulockConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stores.len(), 3);
        assert_eq!(config.ttl_ms, 30_000);
        assert!(!config.shuffle);
        assert_eq!(config.store_timeout_ms, 50);
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.probe.command, "/usr/bin/nvidia-smi");
        assert_eq!(config.probe.args, vec!["pmon", "-c", "1"]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"node-7\"\nacquire_deadline_ms = 2000").unwrap();

        let config = GpulockConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host_identity(), "node-7");
        assert_eq!(config.acquire_deadline(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ttl_ms = \"soon\"").unwrap();

        let err = GpulockConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, GpulockError::Config(_)));
    }

    #[test]
    fn test_validate_no_stores() {
        let config = GpulockConfig {
            stores: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GpulockError::StoreConfiguration { configured: 0, .. })
        ));
    }

    #[test]
    fn test_validate_store_timeout_below_ttl() {
        let config = GpulockConfig {
            ttl_ms: 100,
            store_timeout_ms: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GpulockError::Config(_))));
    }

    #[test]
    fn test_validate_connect_timeout() {
        let config = GpulockConfig {
            connect_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GpulockError::Config(_))));
    }
}
