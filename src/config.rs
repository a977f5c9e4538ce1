//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ClusterConfig: which role this process plays and the node id.
//!     - RadioConfig: channel/data rate/power plus transceiver wiring.
//!     - NodeConfig: retry/ack timing, probe settle times, sleep length.
//!     - GatewayConfig: ACK burst size and where readings are forwarded.
//!     - IrrigationConfig: pump limits and the water interlock.
//!     - BoardConfig: sensor node pins (hardware builds only).
//!     - SimulationConfig: the in-process test network.
//!     - LoggingConfig: log level and reading verbosity.
//!
//!     every section and field has a default, so a partial file is fine.
//! ```
//!
//! ==============================================================================

use crate::radio::RadioSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `gateway.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "GARDEN_ACCESS_TOKEN";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("radio.channel must be 0..=125, got {0}")]
    Channel(u8),
    #[error("node.retry_count must be at least 1")]
    RetryCount,
    #[error("gateway.ack_burst must be at least 1")]
    AckBurst,
    #[error("irrigation.max_pump_seconds must be at least 1")]
    MaxPumpSeconds,
    #[error("simulation.loss_rate must be in [0, 1), got {0}")]
    LossRate(f64),
    #[error("simulation.nodes must be at least 1")]
    SimulatedNodes,
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub cluster: ClusterConfig,
    pub radio: RadioConfig,
    pub node: NodeConfig,
    pub gateway: GatewayConfig,
    pub irrigation: IrrigationConfig,
    pub board: BoardConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gateway,
    Node,
    Irrigation,
    Simulate,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Gateway => "gateway",
            Role::Node => "node",
            Role::Irrigation => "irrigation",
            Role::Simulate => "simulate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    pub role: Role,
    /// this node's radio id (also the first id in the simulate role)
    pub node_id: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { role: Role::Simulate, node_id: 7 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RadioConfig {
    #[serde(flatten)]
    pub settings: RadioSettings,
    pub spi_bus: u8,
    pub spi_slave: u8,
    pub ce_pin: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self { settings: RadioSettings::default(), spi_bus: 0, spi_slave: 0, ce_pin: 25 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    /// total send attempts per reading
    pub retry_count: u8,
    pub ack_timeout_ms: u32,
    pub moisture_enabled: bool,
    pub moisture_settle_ms: u32,
    pub moisture_full_scale: u16,
    pub temperature_settle_ms: u32,
    pub sleep_quantum_ms: u64,
    pub sleep_quanta: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            retry_count: 2,
            ack_timeout_ms: 100,
            moisture_enabled: true,
            moisture_settle_ms: 100,
            moisture_full_scale: 1024,
            temperature_settle_ms: 375,
            sleep_quantum_ms: 8_000,
            // ~60 minutes
            sleep_quanta: 450,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub ack_burst: u16,
    /// base URL; /api/moisture and /api/temperature are appended
    pub collector_url: String,
    pub access_token: String,
    pub request_timeout_ms: u64,
    pub uplink_timeout_ms: u64,
    pub reboot_delay_ms: u64,
    /// log readings instead of posting them
    pub dry_run: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ack_burst: 100,
            collector_url: "http://127.0.0.1:8080".to_string(),
            access_token: String::new(),
            request_timeout_ms: 10_000,
            uplink_timeout_ms: 5_000,
            reboot_delay_ms: 5_000,
            dry_run: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IrrigationConfig {
    pub bind: String,
    pub max_pump_seconds: u32,
    pub water_check_interval_ms: u64,
    pub water_threshold: u16,
    pub water_settle_ms: u64,
    pub pump_pin: u8,
    pub pump_active_low: bool,
    pub water_power_pin: u8,
    pub water_channel: u8,
    pub adc_spi_slave: u8,
}

impl Default for IrrigationConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_pump_seconds: 20,
            water_check_interval_ms: 5_000,
            water_threshold: 512,
            water_settle_ms: 200,
            pump_pin: 17,
            pump_active_low: true,
            water_power_pin: 27,
            water_channel: 1,
            adc_spi_slave: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BoardConfig {
    pub adc_spi_slave: u8,
    pub moisture_power_pin: u8,
    pub moisture_channel: u8,
    pub temperature_power_pin: u8,
    /// unconnected ADC input used as a noise source
    pub entropy_channel: u8,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self { adc_spi_slave: 1, moisture_power_pin: 23, moisture_channel: 0, temperature_power_pin: 24, entropy_channel: 7 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub nodes: u16,
    pub loss_rate: f64,
    pub seed: u64,
    pub sleep_quantum_ms: u64,
    pub sleep_quanta: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { nodes: 2, loss_rate: 0.3, seed: 42, sleep_quantum_ms: 1_000, sleep_quanta: 8 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback. An explicit path is tried alone.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let paths: Vec<PathBuf> = match explicit {
            Some(p) => vec![p.to_path_buf()],
            None => vec![
                PathBuf::from("config").join("host.toml"),
                PathBuf::from("..").join("config").join("host.toml"),
            ],
        };

        let mut config = None;
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(c) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        config = Some(c);
                        break;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        let mut config = config.unwrap_or_else(|| {
            println!("[CONFIG] Warning: No config file found - using defaults");
            Self::default()
        });
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            config.gateway.access_token = token;
        }
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radio.settings.channel > 125 {
            return Err(ConfigError::Channel(self.radio.settings.channel));
        }
        if self.node.retry_count == 0 {
            return Err(ConfigError::RetryCount);
        }
        if self.gateway.ack_burst == 0 {
            return Err(ConfigError::AckBurst);
        }
        if self.irrigation.max_pump_seconds == 0 {
            return Err(ConfigError::MaxPumpSeconds);
        }
        if !(0.0..1.0).contains(&self.simulation.loss_rate) {
            return Err(ConfigError::LossRate(self.simulation.loss_rate));
        }
        if self.simulation.nodes == 0 {
            return Err(ConfigError::SimulatedNodes);
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Role: {}", self.cluster.role);
        println!("│ Node ID: {}", self.cluster.node_id);
        println!(
            "│ Radio: ch {} {:?} {:?}",
            self.radio.settings.channel, self.radio.settings.data_rate, self.radio.settings.power
        );
        match self.cluster.role {
            Role::Gateway | Role::Simulate => {
                println!("│ Collector: {}", self.gateway.collector_url);
                println!("│ ACK burst: {}", self.gateway.ack_burst);
            }
            Role::Node => {
                println!("│ Retries: {} x {}ms", self.node.retry_count, self.node.ack_timeout_ms);
            }
            Role::Irrigation => {
                println!("│ Listen: {}", self.irrigation.bind);
                println!("│ Max pump: {}s", self.irrigation.max_pump_seconds);
            }
        }
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{DataRate, TxPower};

    #[test]
    fn defaults_match_deployed_network() {
        let c = HostConfig::default();
        assert_eq!(c.radio.settings.channel, 1);
        assert_eq!(c.radio.settings.data_rate, DataRate::Kbps250);
        assert_eq!(c.radio.settings.power, TxPower::Dbm0);
        assert_eq!(c.node.retry_count, 2);
        assert_eq!(c.node.ack_timeout_ms, 100);
        assert_eq!(c.gateway.ack_burst, 100);
        assert_eq!(c.irrigation.max_pump_seconds, 20);
        assert_eq!(c.irrigation.water_threshold, 512);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c: HostConfig = toml::from_str(
            r#"
            [cluster]
            role = "gateway"

            [radio]
            channel = 76

            [gateway]
            collector_url = "http://collector.local"
            "#,
        )
        .unwrap();
        assert_eq!(c.cluster.role, Role::Gateway);
        assert_eq!(c.cluster.node_id, 7);
        assert_eq!(c.radio.settings.channel, 76);
        assert_eq!(c.radio.settings.data_rate, DataRate::Kbps250);
        assert_eq!(c.radio.ce_pin, 25);
        assert_eq!(c.gateway.collector_url, "http://collector.local");
        assert_eq!(c.gateway.ack_burst, 100);
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut c = HostConfig::default();
        c.radio.settings.channel = 200;
        assert_eq!(c.validate(), Err(ConfigError::Channel(200)));

        let mut c = HostConfig::default();
        c.node.retry_count = 0;
        assert_eq!(c.validate(), Err(ConfigError::RetryCount));

        let mut c = HostConfig::default();
        c.simulation.loss_rate = 1.0;
        assert_eq!(c.validate(), Err(ConfigError::LossRate(1.0)));
    }

    #[test]
    fn missing_explicit_file_falls_back_to_defaults() {
        let c = HostConfig::load_or_default(Some(Path::new("/nonexistent/host.toml")));
        assert_eq!(c.gateway.ack_burst, 100);
    }

    #[test]
    fn shipped_host_toml_loads_and_validates() {
        let c = HostConfig::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join("host.toml")).unwrap();
        assert_eq!(c.cluster.role, Role::Simulate);
        assert_eq!(c.node.sleep_quanta, 450);
        assert!(c.validate().is_ok());
    }
}
