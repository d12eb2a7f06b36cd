//! Device configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::I2cSpeed;
use crate::protocol::constants::{CH341_PRODUCT_ID, CH341_VENDOR_ID};

/// Configuration for opening an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB vendor ID to match.
    pub vendor_id: u16,
    /// USB product ID to match.
    pub product_id: u16,
    /// Which adapter to open when several are plugged in (0-indexed).
    pub index: usize,
    /// Bulk/control transfer timeout in milliseconds.
    pub timeout_ms: u64,
    /// Bus clock configured at open.
    pub speed: I2cSpeed,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: CH341_VENDOR_ID,
            product_id: CH341_PRODUCT_ID,
            index: 0,
            timeout_ms: 1000,
            speed: I2cSpeed::Standard,
        }
    }
}

impl DeviceConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
        let config: DeviceConfig =
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_adapter() {
        let config = DeviceConfig::default();
        assert_eq!(config.vendor_id, 0x1A86);
        assert_eq!(config.product_id, 0x5512);
        assert_eq!(config.speed, I2cSpeed::Standard);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = DeviceConfig::default();
        config.index = 1;
        config.speed = I2cSpeed::Fast;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: DeviceConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.index, 1);
        assert_eq!(parsed.speed, I2cSpeed::Fast);
        assert_eq!(parsed.timeout_ms, config.timeout_ms);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: DeviceConfig = toml::from_str("speed = \"fast\"\n").unwrap();
        assert_eq!(parsed.speed, I2cSpeed::Fast);
        assert_eq!(parsed.vendor_id, CH341_VENDOR_ID);
    }
}
