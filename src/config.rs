//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: which thing's shadow this host mirrors.
//!     - ShadowConfig: debounce window and indicator fade timing.
//!     - TransportConfig: simulated badge behaviour.
//!     - TelemetryConfig: sensor topic and optional forwarding endpoint.
//!     - ServerConfig: dashboard bind address.
//!     - LoggingConfig: default filter and sensor echo.
//!
//!     every section is optional; a missing section takes its defaults.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::reconciler::{ReconcilerConfig, DEFAULT_FADE_STEPS};
use crate::simulator::SimulatorConfig;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub thing_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            thing_name: "demo-badge".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShadowConfig {
    pub debounce_ms: u64,
    pub fade_steps: u32,
    pub fade_delay_ms: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 750,
            fade_steps: DEFAULT_FADE_STEPS,
            fade_delay_ms: 50,
        }
    }
}

impl ShadowConfig {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            fade_steps: self.fade_steps,
            fade_delay: Duration::from_millis(self.fade_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: String, // only "simulated" for now
    pub echo_delay_ms: u64,
    pub telemetry_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: "simulated".to_string(),
            echo_delay_ms: 300,
            telemetry_interval_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            echo_delay: Duration::from_millis(self.echo_delay_ms),
            // interval() panics on zero
            telemetry_interval: Duration::from_millis(self.telemetry_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub topic: String,
    /// readings are POSTed here when set
    pub forward_url: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic: "demo_badge/sensors".to_string(),
            forward_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
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
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        if config.device.thing_name.is_empty() {
            anyhow::bail!("device.thing_name must not be empty");
        }
        if config.transport.mode != "simulated" {
            anyhow::bail!("unsupported transport mode '{}'", config.transport.mode);
        }
        Ok(config)
    }

    /// Load with default fallback. runs before logging is up, so it prints.
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("host.toml"),
            std::path::PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Thing: {:<32} │", self.device.thing_name);
        println!("│ Transport: {:<28} │", self.transport.mode);
        println!("│ Debounce: {:<29} │", format!("{}ms", self.shadow.debounce_ms));
        println!("│ Telemetry: {:<28} │", self.telemetry.topic);
        println!("│ Dashboard: {:<28} │", self.server.bind);
        println!("│ Log Level: {:<28} │", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
