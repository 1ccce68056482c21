//! Engine configuration
//!
//! TOML bootstrap configuration with built-in defaults for every field.
//! File resolution (CLI → `CUEFORGE_CONFIG` → user/system file → defaults) is
//! shared with the rest of the workspace via `cueforge_common::config`.
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! buffer_size = 512
//! device = "default"
//!
//! [transport]
//! go_debounce_ms = 250
//!
//! [fades]
//! tick_rate_hz = 60
//!
//! [samples]
//! cache_budget_mb = 512
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{Error, Result};
use cueforge_common::config::{load_config, resolve_config_file, ConfigSource, CONFIG_ENV_VAR};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Audio output settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Frames per render callback
    pub buffer_size: usize,
    /// Output device id (None = sink default)
    pub device: Option<String>,
    /// Cue-output busses per patch
    pub cue_outputs: usize,
    /// Channel count of the software clocked sink
    pub clocked_output_channels: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 512,
            device: None,
            cue_outputs: crate::routing::DEFAULT_CUE_OUTPUTS,
            clocked_output_channels: 2,
        }
    }
}

/// Cue transport settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Minimum interval between accepted `go` presses
    pub go_debounce_ms: u64,
    pub single_cue_mode: bool,
    pub auto_continue_enabled: bool,
    /// Event bus capacity
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            go_debounce_ms: 250,
            single_cue_mode: false,
            auto_continue_enabled: true,
            event_capacity: 256,
        }
    }
}

/// Fade automation settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FadeConfig {
    pub tick_rate_hz: u32,
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self { tick_rate_hz: 60 }
    }
}

/// Decoded sample cache settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub cache_budget_mb: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            cache_budget_mb: 512,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Full EnvFilter directive; overrides `level` when set
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// EnvFilter directive for this configuration
    pub fn directive(&self) -> String {
        self.filter
            .clone()
            .unwrap_or_else(|| format!("cueforge={0},cueforge_engine={0},cueforge_common={0}", self.level))
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub fades: FadeConfig,
    pub samples: SampleConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Resolve and load the configuration file, then validate it
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let source = resolve_config_file(cli_path, CONFIG_ENV_VAR);
        let config: EngineConfig = load_config(&source)?;
        config.validate()?;

        match &source {
            ConfigSource::Defaults => info!("No config file found, using built-in defaults"),
            other => {
                if let Some(path) = other.path() {
                    info!("Loaded configuration from {}", path.display());
                }
            }
        }

        Ok(config)
    }

    /// Parse from TOML text and validate
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = cueforge_common::config::parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(8_000..=384_000).contains(&self.audio.sample_rate) {
            return Err(Error::Config(format!(
                "audio.sample_rate {} outside 8000..=384000",
                self.audio.sample_rate
            )));
        }
        if !(16..=16_384).contains(&self.audio.buffer_size) {
            return Err(Error::Config(format!(
                "audio.buffer_size {} outside 16..=16384",
                self.audio.buffer_size
            )));
        }
        if self.audio.cue_outputs == 0 {
            return Err(Error::Config("audio.cue_outputs must be > 0".to_string()));
        }
        if self.audio.clocked_output_channels == 0 {
            return Err(Error::Config(
                "audio.clocked_output_channels must be > 0".to_string(),
            ));
        }
        if !(1..=1000).contains(&self.fades.tick_rate_hz) {
            return Err(Error::Config(format!(
                "fades.tick_rate_hz {} outside 1..=1000",
                self.fades.tick_rate_hz
            )));
        }
        if self.transport.event_capacity == 0 {
            return Err(Error::Config(
                "transport.event_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn go_debounce(&self) -> Duration {
        Duration::from_millis(self.transport.go_debounce_ms)
    }

    pub fn fade_tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fades.tick_rate_hz.max(1)))
    }

    /// Render callback period for the configured buffer
    pub fn buffer_period(&self) -> Duration {
        let nanos = self.audio.buffer_size as u64 * 1_000_000_000 / u64::from(self.audio.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }

    pub fn sample_budget_bytes(&self) -> usize {
        self.samples.cache_budget_mb.saturating_mul(1024 * 1024)
    }
}
