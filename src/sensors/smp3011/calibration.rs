//! SMP3011 output transfer function
//!
//! The part conditions its bridge internally and reports pressure and
//! temperature as fractions of full scale. Pressure spans 15 %..85 % of the
//! 24-bit output across the rated range; temperature spans the full 16-bit
//! output across −40..150 °C.

use serde::{Deserialize, Serialize};

/// 2^24, full scale of the pressure output word
pub const PRESSURE_FULL_SCALE: f32 = 16_777_216.0;
/// 2^16, full scale of the temperature output word
pub const TEMPERATURE_FULL_SCALE: f32 = 65_536.0;

/// Status byte flags
pub mod status {
    pub const POWERED: u8 = 0x40;
    pub const BUSY: u8 = 0x20;
    pub const MODE_MASK: u8 = 0x18;
    pub const MEMORY_ERROR: u8 = 0x04;
    pub const SATURATED: u8 = 0x01;

    /// Bits compared against the identity signature
    pub const IDENTITY_MASK: u8 = 0xC4;
    /// Powered, memory intact, top bit clear
    pub const IDENTITY_SIGNATURE: u8 = POWERED;
}

/// Rated pressure range of the fitted part
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureRange {
    pub min_pa: i32,
    pub max_pa: i32,
}

impl Default for PressureRange {
    fn default() -> Self {
        Self {
            min_pa: 0,
            max_pa: 500_000,
        }
    }
}

/// Transfer-function coefficients, in the order they are applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smp3011Calibration {
    pub pressure_min_pa: f32,
    pub pressure_max_pa: f32,
    /// Output fraction at `pressure_min_pa`
    pub output_min: f32,
    /// Output fraction at `pressure_max_pa`
    pub output_max: f32,
    pub temperature_min_c: f32,
    pub temperature_max_c: f32,
}

impl Smp3011Calibration {
    pub fn for_range(range: PressureRange) -> Self {
        Self {
            pressure_min_pa: range.min_pa as f32,
            pressure_max_pa: range.max_pa as f32,
            output_min: 0.15,
            output_max: 0.85,
            temperature_min_c: -40.0,
            temperature_max_c: 150.0,
        }
    }

    pub fn compensate_temperature(&self, raw: u16) -> f32 {
        let fraction = raw as f32 / TEMPERATURE_FULL_SCALE;
        self.temperature_min_c + fraction * (self.temperature_max_c - self.temperature_min_c)
    }

    pub fn compensate_pressure(&self, raw: u32) -> f32 {
        let fraction = raw as f32 / PRESSURE_FULL_SCALE;
        let span = (fraction - self.output_min) / (self.output_max - self.output_min);
        self.pressure_min_pa + span * (self.pressure_max_pa - self.pressure_min_pa)
    }

    /// Full conversion to (°C, Pa), temperature first
    pub fn compensate(&self, raw: Smp3011Raw) -> (f32, f32) {
        let temperature = self.compensate_temperature(raw.temperature);
        let pressure = self.compensate_pressure(raw.pressure);
        (temperature, pressure)
    }
}

/// Output words of one conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smp3011Raw {
    pub status: u8,
    /// 24-bit pressure word
    pub pressure: u32,
    /// 16-bit temperature word
    pub temperature: u16,
}

impl Smp3011Raw {
    /// Decode `status, P[23:16], P[15:8], P[7:0], T[15:8], T[7:0]`
    pub fn from_bytes(b: &[u8; 6]) -> Self {
        Self {
            status: b[0],
            pressure: u32::from_be_bytes([0, b[1], b[2], b[3]]),
            temperature: u16::from_be_bytes([b[4], b[5]]),
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.status & status::SATURATED != 0
    }
}
