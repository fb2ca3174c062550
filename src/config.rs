//! Configuration management for chip8-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (CHIP8_SUPER_CHIP, etc.)
//! 2. Project-local config file (`./chip8-emu.toml`)
//! 3. User config file (`~/.config/chip8-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # chip8-emu.toml
//!
//! # Enable the Super-CHIP-48 extension instructions
//! super_chip = true
//!
//! # Nominal instruction rate a driver should step at, in Hz
//! clock_hz = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Nominal instruction rate when none is configured.
const DEFAULT_CLOCK_HZ: u32 = 500;

/// Timer decrement rate. Fixed by the platform, but configurable for
/// drivers that deliberately run slow or fast.
const DEFAULT_TIMER_HZ: u32 = 60;

/// chip8-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Enable the Super-CHIP-48 extension (high resolution, scrolling,
    /// persistent flag registers).
    pub super_chip: Option<bool>,

    /// Instruction rate the driver should call `step` at, in Hz.
    pub clock_hz: Option<u32>,

    /// Rate the driver should call `tick` at, in Hz.
    pub timer_hz: Option<u32>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `chip8-emu.toml`
    /// 3. User config `~/.config/chip8-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Whether the Super-CHIP extension is enabled. Defaults to off.
    pub fn super_chip(&self) -> bool {
        self.super_chip.unwrap_or(false)
    }

    /// Instruction rate in Hz, with fallback to the historical 500.
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz.unwrap_or(DEFAULT_CLOCK_HZ)
    }

    /// Timer rate in Hz, with fallback to 60.
    pub fn timer_hz(&self) -> u32 {
        self.timer_hz.unwrap_or(DEFAULT_TIMER_HZ)
    }

    /// Load user configuration from ~/.config/chip8-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("chip8-emu").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./chip8-emu.toml
    fn load_local_config() -> Option<Self> {
        // Try current directory
        let local_path = Path::new("chip8-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        // Try to find project root by looking for Cargo.toml
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("chip8-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.super_chip.is_some() {
            self.super_chip = other.super_chip;
        }
        if other.clock_hz.is_some() {
            self.clock_hz = other.clock_hz;
        }
        if other.timer_hz.is_some() {
            self.timer_hz = other.timer_hz;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("CHIP8_SUPER_CHIP") {
            let enabled = matches!(value.as_str(), "1" | "true" | "yes");
            log::info!("Using CHIP8_SUPER_CHIP from environment: {}", enabled);
            self.super_chip = Some(enabled);
        }
        if let Ok(value) = std::env::var("CHIP8_CLOCK_HZ") {
            match value.parse() {
                Ok(hz) => {
                    log::info!("Using CHIP8_CLOCK_HZ from environment: {}", hz);
                    self.clock_hz = Some(hz);
                }
                Err(_) => log::warn!("Ignoring unparsable CHIP8_CLOCK_HZ: {}", value),
            }
        }
        if let Ok(value) = std::env::var("CHIP8_TIMER_HZ") {
            match value.parse() {
                Ok(hz) => {
                    log::info!("Using CHIP8_TIMER_HZ from environment: {}", hz);
                    self.timer_hz = Some(hz);
                }
                Err(_) => log::warn!("Ignoring unparsable CHIP8_TIMER_HZ: {}", value),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("chip8-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# chip8-emu configuration
# Place this file at ~/.config/chip8-emu/config.toml or ./chip8-emu.toml

# Enable the Super-CHIP-48 extension instructions (default: false)
# super_chip = true

# Nominal instruction rate in Hz a driver should step at (default: 500)
# clock_hz = 500

# Timer rate in Hz a driver should tick at (default: 60)
# timer_hz = 60
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert!(!config.super_chip());
        assert_eq!(config.clock_hz(), 500);
        assert_eq!(config.timer_hz(), 60);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            super_chip: Some(true),
            clock_hz: None,
            timer_hz: Some(60),
        };

        let overlay = Config {
            super_chip: None,
            clock_hz: Some(700),
            timer_hz: Some(50),
        };

        base.merge(overlay);

        // super_chip unchanged (overlay was None)
        assert_eq!(base.super_chip, Some(true));
        // clock_hz set from overlay
        assert_eq!(base.clock_hz, Some(700));
        // timer_hz overridden by overlay
        assert_eq!(base.timer_hz, Some(50));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        // Should parse without error (all keys are commented out)
        let _: Config = toml::from_str(&sample).expect("Sample config should parse");
    }
}
