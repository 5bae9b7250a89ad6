//! Bosch BMP280 barometric pressure / temperature driver
//!
//! Each cycle runs one forced-mode conversion, then waits the datasheet's
//! worst-case measurement time before reading the ADC registers. There is no
//! status polling; see [`Bmp280Config::max_conversion_time`] for the latency
//! this adds to a poll cycle.

mod calibration;

pub use calibration::{
    ADC_SKIPPED, Bmp280Calibration, Bmp280Raw, CALIBRATION_LEN, CompensatedTemperature,
};

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::{ConversionState, SampleFault, SampleOutcome, SensorDriver};
use crate::bus::{BusDevice, BusMaster};
use crate::error::{Error, IdentityMismatch, TransactionError};
use crate::reading::{Reading, ReadingCache};

/// Address with SDO tied to GND
pub const DEFAULT_ADDRESS: u8 = 0x76;
/// Address with SDO tied to VDDIO
pub const ALTERNATE_ADDRESS: u8 = 0x77;
/// Value of the `id` register
pub const CHIP_ID: u8 = 0x58;

const RESET_COMMAND: u8 = 0xB6;
/// Power-on / soft-reset start-up time (datasheet table 2)
pub const STARTUP_TIME: Duration = Duration::from_millis(2);
const MODE_FORCED: u8 = 0b01;

/// Register map (datasheet section 4.2)
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum Register {
    /// Start of the 24-byte trimming block
    Calibration = 0x88,
    Id = 0xD0,
    Reset = 0xE0,
    /// bit 3 measuring, bit 0 im_update
    Status = 0xF3,
    CtrlMeas = 0xF4,
    Config = 0xF5,
    /// Start of `press_msb..temp_xlsb`
    PressMsb = 0xF7,
}

/// `osrs_t` / `osrs_p` setting
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skipped,
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    const fn bits(self) -> u8 {
        match self {
            Self::Skipped => 0b000,
            Self::X1 => 0b001,
            Self::X2 => 0b010,
            Self::X4 => 0b011,
            Self::X8 => 0b100,
            Self::X16 => 0b101,
        }
    }

    /// Number of ADC samples averaged
    pub const fn factor(self) -> u32 {
        match self {
            Self::Skipped => 0,
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
        }
    }
}

/// IIR filter coefficient
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Off,
    X2,
    X4,
    X8,
    X16,
}

impl Filter {
    const fn bits(self) -> u8 {
        match self {
            Self::Off => 0b000,
            Self::X2 => 0b001,
            Self::X4 => 0b010,
            Self::X8 => 0b011,
            Self::X16 => 0b100,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bmp280Config {
    pub address: u8,
    pub temperature_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub filter: Filter,
}

impl Default for Bmp280Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            temperature_oversampling: Oversampling::X2,
            pressure_oversampling: Oversampling::X16,
            filter: Filter::Off,
        }
    }
}

impl Bmp280Config {
    /// `ctrl_meas` value that starts one forced conversion
    pub const fn ctrl_meas(&self) -> u8 {
        (self.temperature_oversampling.bits() << 5)
            | (self.pressure_oversampling.bits() << 2)
            | MODE_FORCED
    }

    /// `config` value; standby time is irrelevant in forced mode
    pub const fn config_register(&self) -> u8 {
        self.filter.bits() << 2
    }

    /// Datasheet maximum measurement time (appendix B):
    /// `1.25 + 2.3 * osrs_t + (2.3 * osrs_p + 0.575)` ms
    pub const fn max_conversion_time(&self) -> Duration {
        let mut micros = 1_250 + 2_300 * self.temperature_oversampling.factor() as u64;
        let pressure = self.pressure_oversampling.factor() as u64;
        if pressure > 0 {
            micros += 2_300 * pressure + 575;
        }
        Duration::from_micros(micros)
    }
}

pub struct Bmp280<'a, M: BusMaster, D> {
    device: BusDevice<'a, M>,
    delay: D,
    cache: &'a ReadingCache,
    config: Bmp280Config,
    calibration: Option<Bmp280Calibration>,
    state: ConversionState,
    last_raw: Option<Bmp280Raw>,
    cycle: u32,
    consecutive_failures: u32,
}

impl<'a, M: BusMaster, D: DelayNs> Bmp280<'a, M, D> {
    pub fn new(
        device: BusDevice<'a, M>,
        delay: D,
        cache: &'a ReadingCache,
        config: Bmp280Config,
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

    /// Trimming parameters, once `initialize()` has succeeded
    pub fn calibration(&self) -> Option<&Bmp280Calibration> {
        self.calibration.as_ref()
    }

    /// ADC values read by the most recent cycle that got that far
    pub fn last_raw(&self) -> Option<Bmp280Raw> {
        self.last_raw
    }

    /// Number of sample cycles attempted
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Soft reset. Trimming parameters survive a reset, so calibration is
    /// kept. The reset clears `config`, which is written back once the part
    /// has started up again.
    pub async fn reset(&mut self) -> Result<(), TransactionError> {
        self.device
            .write_register(Register::Reset as u8, RESET_COMMAND)
            .await?;
        self.state = ConversionState::Idle;
        self.delay.delay_us(STARTUP_TIME.as_micros() as u32).await;

        self.device
            .write_register(Register::Config as u8, self.config.config_register())
            .await?;
        info!("BMP280 at {:#04x}: soft reset", self.device.address());
        Ok(())
    }

    async fn acquire(&mut self, calibration: Bmp280Calibration) -> Result<Reading, SampleFault> {
        self.state = ConversionState::Converting;
        self.device
            .write_register(Register::CtrlMeas as u8, self.config.ctrl_meas())
            .await?;

        let wait = self.config.max_conversion_time();
        self.delay.delay_us(wait.as_micros() as u32).await;

        let mut data = [0u8; 6];
        self.device
            .read_registers(Register::PressMsb as u8, &mut data)
            .await?;
        self.state = ConversionState::Ready;

        let raw = Bmp280Raw::from_bytes(&data);
        self.last_raw = Some(raw);

        let (temperature_c, pressure_pa) =
            calibration.compensate(raw).ok_or(SampleFault::InvalidData)?;
        self.state = ConversionState::Idle;

        Ok(Reading::fresh(temperature_c, pressure_pa, self.cycle))
    }
}

impl<M: BusMaster, D: DelayNs> SensorDriver for Bmp280<'_, M, D> {
    fn name(&self) -> &'static str {
        "BMP280"
    }

    async fn initialize(&mut self) -> Result<(), Error> {
        let address = self.device.address();

        let mut id = [0u8; 1];
        self.device
            .read_registers(Register::Id as u8, &mut id)
            .await
            .map_err(|e| {
                error!("BMP280 at {:#04x}: identity read failed: {}", address, e);
                e
            })?;

        if id[0] != CHIP_ID {
            error!(
                "BMP280 at {:#04x}: chip id {:#04x}, expected {:#04x}",
                address, id[0], CHIP_ID
            );
            return Err(IdentityMismatch {
                sensor: "BMP280",
                address,
                expected: CHIP_ID,
                found: id[0],
            }
            .into());
        }

        let mut block = [0u8; CALIBRATION_LEN];
        self.device
            .read_registers(Register::Calibration as u8, &mut block)
            .await
            .map_err(|e| {
                error!("BMP280 at {:#04x}: calibration read failed: {}", address, e);
                e
            })?;
        let calibration = Bmp280Calibration::from_bytes(&block);

        self.device
            .write_register(Register::Config as u8, self.config.config_register())
            .await?;

        debug!("BMP280 at {:#04x}: {:?}", address, calibration);
        self.calibration = Some(calibration);
        self.state = ConversionState::Idle;

        info!(
            "BMP280 at {:#04x} ready, conversion wait {} us",
            address,
            self.config.max_conversion_time().as_micros()
        );
        Ok(())
    }

    async fn sample(&mut self) -> SampleOutcome {
        let Some(calibration) = self.calibration else {
            warn!("BMP280 sampled before initialization");
            return SampleOutcome::NotInitialized;
        };

        self.cycle = self.cycle.wrapping_add(1);

        match self.acquire(calibration).await {
            Ok(reading) => {
                self.cache.publish(reading);
                self.consecutive_failures = 0;
                debug!(
                    "BMP280: {} C, {} Pa",
                    reading.temperature_c, reading.pressure_pa
                );
                SampleOutcome::Updated(reading)
            }
            Err(fault) => {
                self.state = ConversionState::Idle;
                self.cache.mark_stale();
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    "BMP280 cycle {} failed ({:?}), keeping last reading ({} in a row)",
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
