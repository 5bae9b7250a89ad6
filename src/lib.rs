#![no_std]

pub mod bus;
pub mod config;
pub mod error;
pub mod labels;
pub mod reading;
pub mod sensors;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod station;

pub use bus::{BusChannel, BusDevice, BusMaster, PinConfig, PortRegistry};
pub use config::StationConfig;
pub use error::{Error, Result};
pub use reading::{Reading, ReadingCache, Validity};
pub use sensors::{Bmp280, SampleOutcome, SensorDriver, Smp3011};
pub use station::{Station, StationCaches};
