//! Runtime configuration
//!
//! Loaded once at startup from TOML, with spec'd protocol constants as
//! built-in defaults. Loading order:
//!
//! 1. `--config <path>` CLI flag
//! 2. `EGS_CONFIG` environment variable (path to a TOML file)
//! 3. `egs.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The timing constants under `[gateway]`, `[assertion]` and `[changeover]`
//! are protocol constraints of the downstream radio link, not performance
//! knobs. In particular the 1 cmd/s rate limit must not be lowered.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EgsConfig {
    pub gateway: GatewayConfig,
    pub assertion: AssertionConfig,
    pub changeover: ChangeoverConfig,
    pub server: ServerConfig,
    pub weather: WeatherConfig,
    pub storage: StorageConfig,
}

impl EgsConfig {
    /// Load configuration following the documented precedence. A missing
    /// file falls back to defaults; a malformed file is a startup error.
    pub fn load(cli_path: Option<&str>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let candidate = cli_path
            .map(String::from)
            .or_else(|| std::env::var("EGS_CONFIG").ok())
            .unwrap_or_else(|| "egs.toml".to_string());

        let path = Path::new(&candidate);
        if !path.exists() {
            if cli_path.is_some() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            tracing::info!("No config file found, using built-in defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: EgsConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }
}

/// Edge-bridge link and command pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Edge bridge address (the ESP32 access point by default).
    pub host: String,
    pub port: u16,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Deadline for the one-byte `K` acknowledgment.
    pub ack_timeout_ms: u64,
    /// Retries after the first attempt (2 retries = 3 attempts).
    pub retries: u32,
    /// Pause between attempts.
    pub retry_pause_ms: u64,
    /// Minimum gap after each completed frame.
    pub inter_frame_gap_ms: u64,
    /// Minimum spacing between attempted sends (the 1 cmd/s ceiling).
    pub rate_limit_ms: u64,
    /// When false, a successful write counts as success (fire-and-forget).
    pub require_ack: bool,
    /// Pending command queue capacity.
    pub queue_capacity: usize,
    /// Reconnect backoff start, doubling to the cap below.
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Overall guard on a caller waiting for its frame's outcome.
    pub request_guard_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".to_string(),
            port: 9000,
            connect_timeout_secs: 3,
            ack_timeout_ms: 1200,
            retries: 2,
            retry_pause_ms: 100,
            inter_frame_gap_ms: 25,
            rate_limit_ms: 1000,
            require_ack: true,
            queue_capacity: 256,
            reconnect_initial_ms: 50,
            reconnect_max_ms: 2000,
            request_guard_secs: 5,
        }
    }
}

impl GatewayConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn inter_frame_gap(&self) -> Duration {
        Duration::from_millis(self.inter_frame_gap_ms)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn request_guard(&self) -> Duration {
        Duration::from_secs(self.request_guard_secs)
    }
}

/// Zone re-assertion loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssertionConfig {
    /// Loop wake-up period.
    pub tick_secs: u64,
    /// Re-assert when the active zone is stale by at least this much.
    pub interval_secs: u64,
    /// Attempts per assertion cycle.
    pub retries: u32,
    /// Delay between attempts within a cycle.
    pub retry_delay_secs: u64,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            tick_secs: 2,
            interval_secs: 15,
            retries: 3,
            retry_delay_secs: 5,
        }
    }
}

/// Changeover and deactivation protocol settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeoverConfig {
    /// Hard cap on waiting for the old zone to acknowledge OFF.
    pub off_wait_timeout_secs: u64,
    /// Retry rounds within the OFF-wait.
    pub off_wait_rounds: u32,
    /// Gap between OFF-wait rounds.
    pub off_wait_round_gap_ms: u64,
    /// Settle delay after the OFF-wait, before the new zone lights.
    pub settle_ms: u64,
    /// OFF batch rounds during deactivation.
    pub deactivation_rounds: u32,
    /// Delay between deactivation OFF rounds.
    pub deactivation_round_delay_secs: u64,
}

impl Default for ChangeoverConfig {
    fn default() -> Self {
        Self {
            off_wait_timeout_secs: 10,
            off_wait_rounds: 3,
            off_wait_round_gap_ms: 500,
            settle_ms: 300,
            deactivation_rounds: 3,
            deactivation_round_delay_secs: 2,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Weather telemetry poller settings. The feed is advisory; it never
/// participates in the activation/deactivation safety loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub enabled: bool,
    /// Serial terminal server in front of the data logger.
    pub host: String,
    pub port: u16,
    pub poll_interval_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 4001,
            poll_interval_secs: 60,
            read_timeout_secs: 10,
        }
    }
}

/// Persistent store locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = EgsConfig::default();
        assert_eq!(config.gateway.host, "192.168.4.1");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.ack_timeout_ms, 1200);
        assert_eq!(config.gateway.retries, 2);
        assert_eq!(config.gateway.inter_frame_gap_ms, 25);
        assert_eq!(config.gateway.rate_limit_ms, 1000);
        assert!(config.gateway.require_ack);
        assert_eq!(config.assertion.interval_secs, 15);
        assert_eq!(config.assertion.tick_secs, 2);
        assert_eq!(config.assertion.retries, 3);
        assert_eq!(config.changeover.off_wait_timeout_secs, 10);
        assert_eq!(config.weather.poll_interval_secs, 60);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: EgsConfig = toml::from_str(
            r#"
            [gateway]
            host = "10.0.0.5"

            [server]
            addr = "127.0.0.1:9090"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.host, "10.0.0.5");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.server.addr, "127.0.0.1:9090");
        assert_eq!(config.assertion.interval_secs, 15);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<EgsConfig, _> = toml::from_str(
            r#"
            [gateway]
            hosst = "typo"
            "#,
        );
        assert!(result.is_err());
    }
}
