//! SMP3011 precision pressure / temperature driver
//!
//! The part has no trimming ROM to read: its output is already conditioned,
//! and the calibration set is the transfer function of the fitted pressure
//! range. Conversions are waited for by polling the busy bit of the status
//! byte rather than by a fixed delay.

mod calibration;

pub use calibration::{
    PRESSURE_FULL_SCALE, PressureRange, Smp3011Calibration, Smp3011Raw, TEMPERATURE_FULL_SCALE,
    status,
};

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::{ConversionState, SampleFault, SampleOutcome, SensorDriver};
use crate::bus::{BusDevice, BusMaster};
use crate::error::{Error, IdentityMismatch};
use crate::reading::{Reading, ReadingCache};

pub const DEFAULT_ADDRESS: u8 = 0x78;

/// Starts one pressure + temperature conversion
pub const CMD_MEASURE: u8 = 0xAC;

/// Interval between busy-bit polls
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Polls before a conversion is given up on
pub const MAX_STATUS_POLLS: u32 = 25;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smp3011Config {
    pub address: u8,
    pub range: PressureRange,
}

impl Default for Smp3011Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            range: PressureRange::default(),
        }
    }
}

/// Longest a conversion may take before the cycle is marked stale
pub const fn max_conversion_time() -> Duration {
    Duration::from_millis(STATUS_POLL_INTERVAL.as_millis() * MAX_STATUS_POLLS as u64)
}

pub struct Smp3011<'a, M: BusMaster, D> {
    device: BusDevice<'a, M>,
    delay: D,
    cache: &'a ReadingCache,
    config: Smp3011Config,
    calibration: Option<Smp3011Calibration>,
    state: ConversionState,
    last_raw: Option<Smp3011Raw>,
    cycle: u32,
    consecutive_failures: u32,
}

impl<'a, M: BusMaster, D: DelayNs> Smp3011<'a, M, D> {
    pub fn new(
        device: BusDevice<'a, M>,
        delay: D,
        cache: &'a ReadingCache,
        config: Smp3011Config,
    ) -> Self {
        Self {
            device,
            delay,
            cache,
            config,
            calibration: None,
            state: ConversionState::Idle,
            last_raw: None,
            cycle: 0,
            consecutive_failures: 0,
        }
    }

    pub fn calibration(&self) -> Option<&Smp3011Calibration> {
        self.calibration.as_ref()
    }

    pub fn last_raw(&self) -> Option<Smp3011Raw> {
        self.last_raw
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    async fn read_status(&mut self) -> Result<u8, SampleFault> {
        let mut byte = [0u8; 1];
        self.device.read(&mut byte).await?;
        Ok(byte[0])
    }

    async fn wait_ready(&mut self) -> Result<(), SampleFault> {
        for _ in 0..MAX_STATUS_POLLS {
            self.delay
                .delay_us(STATUS_POLL_INTERVAL.as_micros() as u32)
                .await;

            if self.read_status().await? & status::BUSY == 0 {
                return Ok(());
            }
        }

        Err(SampleFault::ConversionTimeout)
    }

    async fn acquire(&mut self, calibration: Smp3011Calibration) -> Result<Reading, SampleFault> {
        self.state = ConversionState::Converting;
        self.device.write(&[CMD_MEASURE]).await?;
        self.wait_ready().await?;

        let mut frame = [0u8; 6];
        self.device.read(&mut frame).await?;
        self.state = ConversionState::Ready;

        let raw = Smp3011Raw::from_bytes(&frame);
        self.last_raw = Some(raw);
        if raw.is_saturated() {
            return Err(SampleFault::InvalidData);
        }

        let (temperature_c, pressure_pa) = calibration.compensate(raw);
        self.state = ConversionState::Idle;

        Ok(Reading::fresh(temperature_c, pressure_pa, self.cycle))
    }
}

impl<M: BusMaster, D: DelayNs> SensorDriver for Smp3011<'_, M, D> {
    fn name(&self) -> &'static str {
        "SMP3011"
    }

    async fn initialize(&mut self) -> Result<(), Error> {
        let address = self.device.address();

        let mut byte = [0u8; 1];
        self.device.read(&mut byte).await.map_err(|e| {
            error!("SMP3011 at {:#04x}: status read failed: {}", address, e);
            e
        })?;

        let found = byte[0] & status::IDENTITY_MASK;
        if found != status::IDENTITY_SIGNATURE {
            error!(
                "SMP3011 at {:#04x}: status {:#04x} does not match signature",
                address, byte[0]
            );
            return Err(IdentityMismatch {
                sensor: "SMP3011",
                address,
                expected: status::IDENTITY_SIGNATURE,
                found,
            }
            .into());
        }

        let calibration = Smp3011Calibration::for_range(self.config.range);
        debug!("SMP3011 at {:#04x}: {:?}", address, calibration);
        self.calibration = Some(calibration);
        self.state = ConversionState::Idle;

        info!(
            "SMP3011 at {:#04x} ready, range {}..{} Pa, conversion wait up to {} ms",
            address,
            self.config.range.min_pa,
            self.config.range.max_pa,
            max_conversion_time().as_millis()
        );
        Ok(())
    }

    async fn sample(&mut self) -> SampleOutcome {
        let Some(calibration) = self.calibration else {
            warn!("SMP3011 sampled before initialization");
            return SampleOutcome::NotInitialized;
        };

        self.cycle = self.cycle.wrapping_add(1);

        match self.acquire(calibration).await {
            Ok(reading) => {
                self.cache.publish(reading);
                self.consecutive_failures = 0;
                debug!(
                    "SMP3011: {} C, {} Pa",
                    reading.temperature_c, reading.pressure_pa
                );
                SampleOutcome::Updated(reading)
            }
            Err(fault) => {
                self.state = ConversionState::Idle;
                self.cache.mark_stale();
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    "SMP3011 cycle {} failed ({:?}), keeping last reading ({} in a row)",
                    self.cycle, fault, self.consecutive_failures
                );
                SampleOutcome::Stale(fault)
            }
        }
    }

    fn reading(&self) -> Reading {
        self.cache.snapshot()
    }

    fn is_initialized(&self) -> bool {
        self.calibration.is_some()
    }

    fn conversion_state(&self) -> ConversionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusChannel, PinConfig, PortRegistry};
    use crate::error::{TransactionError, TransactionErrorKind};
    use crate::reading::Validity;
    use crate::sim::{InstantDelay, SimBoard, SimBus, SimFault};
    use embassy_futures::block_on;

    /// Output words for roughly 101325 Pa and 20 °C on the default range
    const RAW_PRESSURE_101325: u32 = 4_896_514;
    const RAW_TEMPERATURE_20C: u16 = 20_696;

    fn open_channel(board: &SimBoard) -> BusChannel<SimBus<'_>> {
        let channel = BusChannel::new(board.bus());
        channel
            .configure(
                &PortRegistry::new(),
                PinConfig {
                    port: 1,
                    sda: 33,
                    scl: 32,
                },
            )
            .unwrap();
        block_on(channel.open(100_000)).unwrap();
        channel
    }

    fn driver<'a>(
        channel: &'a BusChannel<SimBus<'a>>,
        cache: &'a ReadingCache,
    ) -> Smp3011<'a, SimBus<'a>, InstantDelay> {
        let device = channel.attach(DEFAULT_ADDRESS).unwrap();
        Smp3011::new(device, InstantDelay, cache, Smp3011Config::default())
    }

    #[test]
    fn test_worst_case_wait() {
        assert_eq!(max_conversion_time(), Duration::from_millis(50));
    }

    #[test]
    fn test_initialize_and_sample() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_raw(RAW_PRESSURE_101325, RAW_TEMPERATURE_20C);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);

        block_on(smp.initialize()).unwrap();
        assert!(smp.is_initialized());

        let SampleOutcome::Updated(reading) = block_on(smp.sample()) else {
            panic!("sample did not update");
        };
        assert!((reading.temperature_c - 20.0).abs() < 0.01);
        assert!((reading.pressure_pa - 101_325.0).abs() < 0.5);
        assert_eq!(smp.read_pressure(), reading.pressure_pa);
        assert_eq!(board.smp3011_conversions(), 1);
        assert_eq!(smp.conversion_state(), ConversionState::Idle);
    }

    #[test]
    fn test_identity_mismatch() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_status(status::POWERED | status::MEMORY_ERROR);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);

        let err = block_on(smp.initialize()).unwrap_err();
        assert_eq!(
            err,
            Error::IdentityMismatch(IdentityMismatch {
                sensor: "SMP3011",
                address: DEFAULT_ADDRESS,
                expected: status::IDENTITY_SIGNATURE,
                found: status::POWERED | status::MEMORY_ERROR,
            })
        );
        assert!(smp.calibration().is_none());

        let transactions = board.transaction_count();
        assert_eq!(block_on(smp.sample()), SampleOutcome::NotInitialized);
        assert_eq!(board.transaction_count(), transactions);
    }

    #[test]
    fn test_unpowered_part_is_rejected() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_status(0x00);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);

        assert!(matches!(
            block_on(smp.initialize()),
            Err(Error::IdentityMismatch(_))
        ));
    }

    #[test]
    fn test_stale_on_timeout() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_raw(RAW_PRESSURE_101325, RAW_TEMPERATURE_20C);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);
        block_on(smp.initialize()).unwrap();
        assert!(block_on(smp.sample()).is_updated());
        let before = cache.snapshot();

        board.fail_next(SimFault::Timeout);
        assert_eq!(
            block_on(smp.sample()),
            SampleOutcome::Stale(SampleFault::Bus(TransactionError::new(
                DEFAULT_ADDRESS,
                TransactionErrorKind::Timeout
            )))
        );

        let after = cache.snapshot();
        assert_eq!(after.temperature_c, before.temperature_c);
        assert_eq!(after.pressure_pa, before.pressure_pa);
        assert_eq!(after.validity, Validity::Stale);
        assert_eq!(smp.consecutive_failures(), 1);
    }

    #[test]
    fn test_polls_until_ready() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_busy_polls(5);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);
        block_on(smp.initialize()).unwrap();

        let before = board.transaction_count();
        assert!(block_on(smp.sample()).is_updated());
        // trigger + 5 busy polls + 1 ready poll + frame read
        assert_eq!(board.transaction_count() - before, 8);
    }

    #[test]
    fn test_stuck_busy_is_conversion_timeout() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_busy_polls(u8::MAX);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);
        block_on(smp.initialize()).unwrap();

        assert_eq!(
            block_on(smp.sample()),
            SampleOutcome::Stale(SampleFault::ConversionTimeout)
        );
        assert_eq!(cache.snapshot().validity, Validity::Empty);
    }

    #[test]
    fn test_saturation_is_invalid_data() {
        let board = SimBoard::new().with_smp3011(DEFAULT_ADDRESS);
        board.set_smp3011_saturated(true);
        let channel = open_channel(&board);
        let cache = ReadingCache::new();
        let mut smp = driver(&channel, &cache);
        block_on(smp.initialize()).unwrap();

        assert_eq!(
            block_on(smp.sample()),
            SampleOutcome::Stale(SampleFault::InvalidData)
        );
        assert!(smp.last_raw().is_some_and(|raw| raw.is_saturated()));
    }
}
