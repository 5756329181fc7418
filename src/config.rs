//! File-based configuration

use crate::adapter::AdapterConfig;
use crate::connection::ConnectionConfig;
use anyhow::{Context, Result};
use provision_shared::limits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a provisioning run
///
/// Every field is optional in the file; missing ones fall back to the
/// shared defaults in `provision_shared::limits`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub connection: ConnectionSection,
    pub adapter: AdapterSection,
    pub run: RunSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// Device agent address
    pub address: String,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            address: ConnectionConfig::default().address,
            connect_timeout_ms: limits::CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdapterSection {
    pub command_timeout_secs: u64,
    pub restart_timeout_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    pub fetch_retry_times: u32,
    pub fetch_retry_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Treat restarts as no-ops
    pub no_reboot: bool,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: limits::DEFAULT_COMMAND_TIMEOUT_SECS,
            restart_timeout_secs: limits::RESTART_TIMEOUT_SECS,
            reconnect_attempts: limits::RESTART_RECONNECT_ATTEMPTS,
            reconnect_interval_ms: limits::RESTART_RECONNECT_INTERVAL_MS,
            fetch_retry_times: limits::FETCH_RETRY_TIMES,
            fetch_retry_interval_ms: limits::FETCH_RETRY_INTERVAL_MS,
            poll_interval_ms: limits::OPERATION_POLL_INTERVAL_MS,
            no_reboot: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunSection {
    /// Deadline for the whole session
    pub timeout_secs: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            timeout_secs: limits::PROVISION_TIMEOUT_SECS,
        }
    }
}

impl ProvisionConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid provision config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            address: self.connection.address.clone(),
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
        }
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        let a = &self.adapter;
        AdapterConfig {
            command_timeout: Duration::from_secs(a.command_timeout_secs),
            restart_timeout: Duration::from_secs(a.restart_timeout_secs),
            reconnect_attempts: a.reconnect_attempts,
            reconnect_interval: Duration::from_millis(a.reconnect_interval_ms),
            fetch_retry_times: a.fetch_retry_times,
            fetch_retry_interval: Duration::from_millis(a.fetch_retry_interval_ms),
            poll_interval: Duration::from_millis(a.poll_interval_ms),
            no_reboot: a.no_reboot,
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ProvisionConfig::from_toml("").expect("parse");
        assert_eq!(config, ProvisionConfig::default());

        let adapter = config.adapter_config();
        assert_eq!(adapter.reconnect_attempts, 50);
        assert_eq!(adapter.reconnect_interval, Duration::from_secs(10));
        assert_eq!(adapter.fetch_retry_times, 3);
        assert_eq!(config.run_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_sections() {
        let config = ProvisionConfig::from_toml(
            r#"
            [connection]
            address = "dut-7:7700"

            [adapter]
            no_reboot = true
            fetch_retry_interval_ms = 250

            [run]
            timeout_secs = 90
            "#,
        )
        .expect("parse");

        assert_eq!(config.connection_config().address, "dut-7:7700");
        assert_eq!(
            config.connection_config().connect_timeout,
            Duration::from_millis(limits::CONNECT_TIMEOUT_MS)
        );
        let adapter = config.adapter_config();
        assert!(adapter.no_reboot);
        assert_eq!(adapter.fetch_retry_interval, Duration::from_millis(250));
        assert_eq!(adapter.command_timeout, Duration::from_secs(300));
        assert_eq!(config.run_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_rejects_wrong_types() {
        let err = ProvisionConfig::from_toml("[run]\ntimeout_secs = \"soon\"").unwrap_err();
        assert!(err.to_string().contains("invalid provision config"));
    }
}
