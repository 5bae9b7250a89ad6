//! Station configuration
//!
//! Everything wiring-specific lives here so drivers never hard-code pins or
//! addresses. The config round-trips through `postcard` for storage in a
//! flash sector or an RTT-uploaded blob.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::bus::PinConfig;
use crate::sensors::bmp280::Bmp280Config;
use crate::sensors::smp3011::{self, Smp3011Config};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub pins: PinConfig,
    /// Hz
    pub bit_rate: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pins: PinConfig {
                port: 1,
                sda: 33,
                scl: 32,
            },
            bit_rate: 100_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationConfig {
    pub bus: BusConfig,
    pub bmp280: Bmp280Config,
    pub smp3011: Smp3011Config,
    pub poll_interval_ms: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            bmp280: Bmp280Config::default(),
            smp3011: Smp3011Config::default(),
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config does not fit in a {capacity} byte buffer")]
    Encode { capacity: usize },
    #[error("Config blob is malformed")]
    Decode,
    #[error("Both sensors are configured at address {address:#04x}")]
    DuplicateAddress { address: u8 },
    #[error("Poll interval {interval_ms} ms is shorter than the worst-case sample time {required_ms} ms")]
    PollIntervalTooShort { interval_ms: u32, required_ms: u32 },
}

impl StationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }

    /// Conversion waits of both drivers back to back, excluding bus time
    pub fn worst_case_sample_time(&self) -> Duration {
        self.bmp280.max_conversion_time() + smp3011::max_conversion_time()
    }

    /// Reject configs that cannot work on a single shared bus
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bmp280.address == self.smp3011.address {
            return Err(ConfigError::DuplicateAddress {
                address: self.bmp280.address,
            });
        }

        let required = self.worst_case_sample_time();
        if self.poll_interval() < required {
            return Err(ConfigError::PollIntervalTooShort {
                interval_ms: self.poll_interval_ms,
                required_ms: required.as_millis() as u32,
            });
        }

        Ok(())
    }

    /// Encode into `buf`, returning the used prefix
    pub fn to_slice<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        let capacity = buf.len();
        postcard::to_slice(self, buf).map_err(|e| {
            log::error!("Config encode failed: {:?}", e);
            ConfigError::Encode { capacity }
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|e| {
            log::error!("Config decode failed: {:?}", e);
            ConfigError::Decode
        })
    }
}
