//! Tool configuration management

use anyhow::{Context, Result, anyhow};
use protocol::{I2C_ADDR_MAX, I2C_ADDR_MIN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub i2c: I2cSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default log level when RUST_LOG is not set
    #[serde(default = "LogSettings::default_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LogSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Secondary-bus probing window used when querying bridge boards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct I2cSettings {
    /// Lowest address probed (inclusive)
    #[serde(default = "I2cSettings::default_probe_low")]
    pub probe_low: u8,
    /// Highest address probed (inclusive)
    #[serde(default = "I2cSettings::default_probe_high")]
    pub probe_high: u8,
}

impl Default for I2cSettings {
    fn default() -> Self {
        Self {
            probe_low: Self::default_probe_low(),
            probe_high: Self::default_probe_high(),
        }
    }
}

impl I2cSettings {
    fn default_probe_low() -> u8 {
        I2C_ADDR_MIN
    }

    fn default_probe_high() -> u8 {
        I2C_ADDR_MAX
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            i2c: I2cSettings::default(),
        }
    }
}

impl CliConfig {
    /// Load configuration from the specified path, or from the default
    /// location when no path is given
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let candidate = Self::default_path();
                if !candidate.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                candidate
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or fall back to defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("benchusb").join("config.toml")
        } else {
            PathBuf::from(".config/benchusb/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }

        let low = self.i2c.probe_low;
        let high = self.i2c.probe_high;
        if !(I2C_ADDR_MIN..=I2C_ADDR_MAX).contains(&low)
            || !(I2C_ADDR_MIN..=I2C_ADDR_MAX).contains(&high)
        {
            return Err(anyhow!(
                "I2C probe window 0x{low:02x}..0x{high:02x} outside the valid range \
                 0x{I2C_ADDR_MIN:02x}..0x{I2C_ADDR_MAX:02x}"
            ));
        }
        if low > high {
            return Err(anyhow!(
                "I2C probe window is empty: low 0x{low:02x} above high 0x{high:02x}"
            ));
        }

        Ok(())
    }
}
