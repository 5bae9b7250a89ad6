//! Both pressure sensors on one shared bus
//!
//! The station owns one driver of each family. Each driver publishes into
//! its own [`ReadingCache`], so a display task holding `&StationCaches`
//! never waits on the bus.

use embedded_hal_async::delay::DelayNs;
use log::{error, info};

use crate::bus::{BusChannel, BusMaster};
use crate::config::StationConfig;
use crate::error::{ConfigurationError, Error};
use crate::reading::{Reading, ReadingCache};
use crate::sensors::{Bmp280, SampleOutcome, SensorDriver, Smp3011};

/// Reading caches shared between the poll task and readers
pub struct StationCaches {
    pub bmp280: ReadingCache,
    pub smp3011: ReadingCache,
}

impl StationCaches {
    pub const fn new() -> Self {
        Self {
            bmp280: ReadingCache::new(),
            smp3011: ReadingCache::new(),
        }
    }

    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            bmp280: self.bmp280.snapshot(),
            smp3011: self.smp3011.snapshot(),
        }
    }
}

impl Default for StationCaches {
    fn default() -> Self {
        Self::new()
    }
}

/// Last published reading of each sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationSnapshot {
    pub bmp280: Reading,
    pub smp3011: Reading,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollReport {
    pub bmp280: SampleOutcome,
    pub smp3011: SampleOutcome,
}

impl PollReport {
    pub fn all_updated(&self) -> bool {
        self.bmp280.is_updated() && self.smp3011.is_updated()
    }
}

pub struct Station<'a, M: BusMaster, D> {
    bmp280: Bmp280<'a, M, D>,
    smp3011: Smp3011<'a, M, D>,
    caches: &'a StationCaches,
    polls: u32,
}

impl<'a, M: BusMaster, D: DelayNs + Clone> Station<'a, M, D> {
    /// Attach both sensors to `channel` at their configured addresses
    pub fn new(
        channel: &'a BusChannel<M>,
        caches: &'a StationCaches,
        config: &StationConfig,
        delay: D,
    ) -> Result<Self, ConfigurationError> {
        let bmp_device = channel.attach(config.bmp280.address)?;
        let smp_device = channel.attach(config.smp3011.address)?;

        Ok(Self {
            bmp280: Bmp280::new(bmp_device, delay.clone(), &caches.bmp280, config.bmp280),
            smp3011: Smp3011::new(smp_device, delay, &caches.smp3011, config.smp3011),
            caches,
            polls: 0,
        })
    }

    /// Initialize both drivers.
    ///
    /// A failure of one driver does not stop the other from being brought up;
    /// the first error is returned and the failed driver stays uninitialized.
    pub async fn initialize(&mut self) -> Result<(), Error> {
        let bmp = self.bmp280.initialize().await;
        let smp = self.smp3011.initialize().await;

        for (name, result) in [("BMP280", &bmp), ("SMP3011", &smp)] {
            if let Err(e) = result {
                error!("{} unavailable: {}", name, e);
            }
        }

        bmp?;
        smp?;
        info!("Station initialized");
        Ok(())
    }

    /// Sample both sensors, one after the other
    pub async fn poll(&mut self) -> PollReport {
        self.polls = self.polls.wrapping_add(1);
        PollReport {
            bmp280: self.bmp280.sample().await,
            smp3011: self.smp3011.sample().await,
        }
    }

    pub fn snapshot(&self) -> StationSnapshot {
        self.caches.snapshot()
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn bmp280(&mut self) -> &mut Bmp280<'a, M, D> {
        &mut self.bmp280
    }

    pub fn smp3011(&mut self) -> &mut Smp3011<'a, M, D> {
        &mut self.smp3011
    }
}
