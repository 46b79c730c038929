//! Simulation configuration.
//!
//! Loaded from TOML; every key is optional:
//!
//! ```toml
//! [peripheral]
//! clock_hz = 10000000
//! pwm_hz = 3000
//!
//! [bus]
//! half_period_ticks = 51
//! settle_ticks = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::{CLOCK_HZ, PWM_HZ};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("clock_hz must be non-zero")]
    ZeroClock,

    #[error("pwm_hz must be non-zero")]
    ZeroPwmFrequency,

    #[error("pwm_hz ({pwm_hz}) exceeds clock_hz ({clock_hz})")]
    PwmAboveClock { clock_hz: u32, pwm_hz: u32 },

    #[error("bus half_period_ticks must be non-zero")]
    ZeroHalfPeriod,
}

/// Clock and PWM frequency of the modelled peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    pub clock_hz: u32,
    pub pwm_hz: u32,
}

impl PeripheralConfig {
    /// PWM period in system clock cycles.
    pub fn pwm_period(&self) -> u32 {
        (self.clock_hz / self.pwm_hz.max(1)).max(1)
    }

    /// Nominal PWM period in nanoseconds.
    pub fn pwm_period_ns(&self) -> f64 {
        self.pwm_period() as f64 * 1e9 / self.clock_hz.max(1) as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_hz == 0 {
            return Err(ConfigError::ZeroClock);
        }
        if self.pwm_hz == 0 {
            return Err(ConfigError::ZeroPwmFrequency);
        }
        if self.pwm_hz > self.clock_hz {
            return Err(ConfigError::PwmAboveClock { clock_hz: self.clock_hz, pwm_hz: self.pwm_hz });
        }
        Ok(())
    }
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        PeripheralConfig { clock_hz: CLOCK_HZ, pwm_hz: PWM_HZ }
    }
}

/// Serial clock cadence used by [`crate::master::SpiMaster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusTiming {
    /// System clocks per serial clock half period
    pub half_period_ticks: u32,
    /// Idle system clocks after chip-select is released
    pub settle_ticks: u32,
}

impl Default for BusTiming {
    fn default() -> Self {
        // 5.1 us per half period and 60 us of idle at 10 MHz
        BusTiming { half_period_ticks: 51, settle_ticks: 600 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub peripheral: PeripheralConfig,
    pub bus: BusTiming,
}

impl SimConfig {
    pub fn from_toml(s: &str) -> Result<SimConfig, ConfigError> {
        let cfg: SimConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<SimConfig, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        SimConfig::from_toml(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.peripheral.validate()?;
        if self.bus.half_period_ticks == 0 {
            return Err(ConfigError::ZeroHalfPeriod);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_period() {
        let cfg = PeripheralConfig::default();
        assert_eq!(cfg.pwm_period(), 3333);
        assert!((cfg.pwm_period_ns() - 333_300.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg = SimConfig::from_toml("").unwrap();
        assert_eq!(cfg, SimConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let cfg = SimConfig::from_toml("[peripheral]\npwm_hz = 1000\n[bus]\nsettle_ticks = 10\n").unwrap();
        assert_eq!(cfg.peripheral.clock_hz, CLOCK_HZ);
        assert_eq!(cfg.peripheral.pwm_period(), 10_000);
        assert_eq!(cfg.bus.half_period_ticks, 51);
        assert_eq!(cfg.bus.settle_ticks, 10);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            SimConfig::from_toml("[peripheral]\npwm_hz = 0\n"),
            Err(ConfigError::ZeroPwmFrequency)
        ));
        assert!(matches!(
            SimConfig::from_toml("[peripheral]\nclock_hz = 100\npwm_hz = 200\n"),
            Err(ConfigError::PwmAboveClock { .. })
        ));
        assert!(matches!(
            SimConfig::from_toml("[bus]\nhalf_period_ticks = 0\n"),
            Err(ConfigError::ZeroHalfPeriod)
        ));
        assert!(matches!(SimConfig::from_toml("[peripheral"), Err(ConfigError::Parse(_))));
    }
}
