//! Bridge configuration, read from a YAML file.
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PORT, DEFAULT_SPI_FREQUENCY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the STK500 server listens on
    pub listen: SocketAddr,
    pub spi: SpiConfig,
    pub reset: ResetConfig,
    /// How long the server sleeps between polls when no client is being served
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    pub device: PathBuf,
    /// SPI clock in Hz, must be below 1/4 of the target's clock
    pub frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    pub gpio_chip: PathBuf,
    pub line: u32,
    /// Set when reset is level-shifted through an n-mos, which inverts it
    pub active_high: bool,
    /// Keep the target in reset while no programming is going on
    pub idle_asserted: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            spi: SpiConfig::default(),
            reset: ResetConfig::default(),
            poll_interval_ms: 10,
        }
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        SpiConfig {
            device: PathBuf::from("/dev/spidev0.0"),
            frequency: DEFAULT_SPI_FREQUENCY,
        }
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        ResetConfig {
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            line: 5,
            active_high: false,
            idle_asserted: false,
        }
    }
}

impl ResetConfig {
    /// Electrical level of the reset pin for a logical reset state.
    pub const fn pin_level(&self, asserted: bool) -> bool {
        asserted == self.active_high
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)
            .map_err(|e| anyhow::format_err!("cannot read config {}: {}", p.display(), e))?;
        let config = Self::from_yaml(&raw)?;
        log::debug!("Loaded config from {}: {:?}", p.display(), config);
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        anyhow::ensure!(config.spi.frequency > 0, "spi.frequency must not be zero");
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
