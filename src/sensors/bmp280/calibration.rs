//! BMP280 trimming coefficients and compensation
//!
//! Integer compensation from the Bosch BMP280 datasheet (section 3.11.3):
//! temperature in 0.01 °C with the shared `t_fine` term, pressure in
//! Q24.8 Pa using 64-bit intermediates.

/// Size of the trimming block at `0x88..=0x9F`
pub const CALIBRATION_LEN: usize = 24;

/// ADC value reported for a channel whose oversampling is set to "skipped"
pub const ADC_SKIPPED: i32 = 0x80000;

/// Factory trimming parameters `dig_T1..dig_P9`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bmp280Calibration {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
}

/// Unconverted 20-bit ADC outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bmp280Raw {
    pub adc_t: i32,
    pub adc_p: i32,
}

impl Bmp280Raw {
    /// Decode the burst read of `press_msb..=temp_xlsb` (`0xF7..=0xFC`)
    pub fn from_bytes(b: &[u8; 6]) -> Self {
        let adc = |msb: u8, lsb: u8, xlsb: u8| {
            ((msb as i32) << 12) | ((lsb as i32) << 4) | ((xlsb as i32) >> 4)
        };

        Self {
            adc_p: adc(b[0], b[1], b[2]),
            adc_t: adc(b[3], b[4], b[5]),
        }
    }
}

/// Temperature result with the fine value pressure compensation needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensatedTemperature {
    /// 0.01 °C
    pub centi_celsius: i32,
    pub t_fine: i32,
}

impl Bmp280Calibration {
    /// Decode the little-endian trimming block
    pub fn from_bytes(b: &[u8; CALIBRATION_LEN]) -> Self {
        let u = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([b[i], b[i + 1]]);

        Self {
            dig_t1: u(0),
            dig_t2: s(2),
            dig_t3: s(4),
            dig_p1: u(6),
            dig_p2: s(8),
            dig_p3: s(10),
            dig_p4: s(12),
            dig_p5: s(14),
            dig_p6: s(16),
            dig_p7: s(18),
            dig_p8: s(20),
            dig_p9: s(22),
        }
    }

    pub fn compensate_temperature(&self, adc_t: i32) -> CompensatedTemperature {
        let adc_t = adc_t as i64;
        let t1 = self.dig_t1 as i64;
        let t2 = self.dig_t2 as i64;
        let t3 = self.dig_t3 as i64;

        let var1 = (((adc_t >> 3) - (t1 << 1)) * t2) >> 11;
        let delta = (adc_t >> 4) - t1;
        let var2 = (((delta * delta) >> 12) * t3) >> 14;
        let t_fine = var1 + var2;

        CompensatedTemperature {
            centi_celsius: ((t_fine * 5 + 128) >> 8) as i32,
            t_fine: t_fine as i32,
        }
    }

    /// Pressure in Q24.8 Pa. `None` when the divisor collapses to zero.
    pub fn compensate_pressure(&self, adc_p: i32, t_fine: i32) -> Option<u32> {
        let p1 = self.dig_p1 as i64;
        let p2 = self.dig_p2 as i64;
        let p3 = self.dig_p3 as i64;
        let p4 = self.dig_p4 as i64;
        let p5 = self.dig_p5 as i64;
        let p6 = self.dig_p6 as i64;
        let p7 = self.dig_p7 as i64;
        let p8 = self.dig_p8 as i64;
        let p9 = self.dig_p9 as i64;

        let mut var1 = t_fine as i64 - 128_000;
        let mut var2 = var1 * var1 * p6;
        var2 += (var1 * p5) << 17;
        var2 += p4 << 35;
        var1 = ((var1 * var1 * p3) >> 8) + ((var1 * p2) << 12);
        var1 = (((1i64 << 47) + var1) * p1) >> 33;

        if var1 == 0 {
            return None;
        }

        let mut p = 1_048_576 - adc_p as i64;
        p = (((p << 31) - var2) * 3125) / var1;
        var1 = (p9 * (p >> 13) * (p >> 13)) >> 25;
        var2 = (p8 * p) >> 19;
        p = ((p + var1 + var2) >> 8) + (p7 << 4);

        u32::try_from(p).ok()
    }

    /// Full conversion to (°C, Pa). Temperature is always computed first.
    ///
    /// `None` for skipped channels or a degenerate pressure divisor.
    pub fn compensate(&self, raw: Bmp280Raw) -> Option<(f32, f32)> {
        if raw.adc_t == ADC_SKIPPED || raw.adc_p == ADC_SKIPPED {
            return None;
        }

        let temperature = self.compensate_temperature(raw.adc_t);
        let pressure = self.compensate_pressure(raw.adc_p, temperature.t_fine)?;

        Some((
            temperature.centi_celsius as f32 / 100.0,
            pressure as f32 / 256.0,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Worked example from the datasheet, section 3.12
    pub(crate) const DATASHEET_CALIBRATION: Bmp280Calibration = Bmp280Calibration {
        dig_t1: 27504,
        dig_t2: 26435,
        dig_t3: -1000,
        dig_p1: 36477,
        dig_p2: -10685,
        dig_p3: 3024,
        dig_p4: 2855,
        dig_p5: 140,
        dig_p6: -7,
        dig_p7: 15500,
        dig_p8: -14600,
        dig_p9: 6000,
    };

    pub(crate) const DATASHEET_RAW: Bmp280Raw = Bmp280Raw {
        adc_t: 519_888,
        adc_p: 415_148,
    };

    #[test]
    fn test_datasheet_temperature() {
        let t = DATASHEET_CALIBRATION.compensate_temperature(DATASHEET_RAW.adc_t);
        assert_eq!(t.t_fine, 128_422);
        assert_eq!(t.centi_celsius, 2508);
    }

    #[test]
    fn test_datasheet_pressure() {
        let p = DATASHEET_CALIBRATION
            .compensate_pressure(DATASHEET_RAW.adc_p, 128_422)
            .unwrap();
        assert_eq!(p, 25_767_233);

        // Datasheet reference: 100653.27 Pa
        let pa = p as f32 / 256.0;
        assert!((pa - 100_653.27).abs() < 0.5, "pressure was {pa}");
    }

    #[test]
    fn test_compensation_is_deterministic() {
        let first = DATASHEET_CALIBRATION.compensate(DATASHEET_RAW);
        let second = DATASHEET_CALIBRATION.compensate(DATASHEET_RAW);
        assert_eq!(first, second);

        let (t, p) = first.unwrap();
        assert!((t - 25.08).abs() < 0.001);
        assert!((p - 100_653.27).abs() < 0.5);
    }

    #[test]
    fn test_calibration_block_decoding() {
        let bytes: [u8; CALIBRATION_LEN] = [
            0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B,
            0x8C, 0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
        ];
        assert_eq!(Bmp280Calibration::from_bytes(&bytes), DATASHEET_CALIBRATION);
    }

    #[test]
    fn test_raw_decoding() {
        let raw = Bmp280Raw::from_bytes(&[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00]);
        assert_eq!(raw, DATASHEET_RAW);
    }

    #[test]
    fn test_skipped_channel_is_invalid() {
        let raw = Bmp280Raw {
            adc_p: ADC_SKIPPED,
            ..DATASHEET_RAW
        };
        assert_eq!(DATASHEET_CALIBRATION.compensate(raw), None);
    }

    #[test]
    fn test_zero_p1_is_invalid() {
        let calibration = Bmp280Calibration {
            dig_p1: 0,
            ..DATASHEET_CALIBRATION
        };
        assert_eq!(calibration.compensate_pressure(DATASHEET_RAW.adc_p, 128_422), None);
    }
}
