pub mod bmp280;
pub mod smp3011;

use crate::error::{Error, TransactionError};
use crate::reading::Reading;

pub use bmp280::Bmp280;
pub use smp3011::Smp3011;

/// Where a driver is in its acquisition cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Idle,
    Converting,
    /// Raw sample read back, compensation pending
    Ready,
}

/// Why a sample cycle produced no new reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFault {
    /// A bus transaction failed
    Bus(TransactionError),
    /// The device never reported a finished conversion
    ConversionTimeout,
    /// Raw values could not be compensated (skipped channel, saturation)
    InvalidData,
}

impl From<TransactionError> for SampleFault {
    fn from(e: TransactionError) -> Self {
        Self::Bus(e)
    }
}

/// Result of one `sample()` call.
///
/// Failures are absorbed here instead of returned as errors: the cache keeps
/// its last valid values and the next cycle simply tries again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// New values were published
    Updated(Reading),
    /// Previous values kept and flagged stale
    Stale(SampleFault),
    /// `initialize()` has not succeeded; no bus traffic was issued
    NotInitialized,
}

impl SampleOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Capability set shared by every sensor family
pub trait SensorDriver {
    /// Short family name used in logs and labels
    fn name(&self) -> &'static str;

    /// Verify the device identity and load its calibration set.
    ///
    /// Errors here are fatal for this driver only.
    fn initialize(&mut self) -> impl Future<Output = Result<(), Error>>;

    /// Run one acquisition cycle. Never fails; see [`SampleOutcome`].
    fn sample(&mut self) -> impl Future<Output = SampleOutcome>;

    /// Last published reading, without touching the bus
    fn reading(&self) -> Reading;

    /// Whether `initialize()` has succeeded
    fn is_initialized(&self) -> bool;

    fn conversion_state(&self) -> ConversionState;

    /// Degrees Celsius from the last successful cycle
    fn read_temperature(&self) -> f32 {
        self.reading().temperature_c
    }

    /// Pascal from the last successful cycle
    fn read_pressure(&self) -> f32 {
        self.reading().pressure_pa
    }
}
