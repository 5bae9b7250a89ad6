//! Display label text
//!
//! Labels are rendered from cache snapshots only. A stale reading keeps
//! showing its last valid value; a cache that never held one shows dashes.

use core::fmt::{self, Write};

use heapless::String;
use log::debug;

use crate::reading::Reading;
use crate::station::StationSnapshot;

/// Widest label: a sign and six integer digits plus the unit, which covers
/// every configurable pressure range. Anything wider is rendered as
/// [`OVERFLOW`].
pub const LABEL_LEN: usize = 9;

pub type Label = String<LABEL_LEN>;

/// Four labels plus the fixed text around them
pub const STATUS_LINE_LEN: usize = 24 + 4 * LABEL_LEN;

/// One status line: both sensors, both quantities
pub type StatusLine = String<STATUS_LINE_LEN>;

const PLACEHOLDER: &str = "  ----";

/// Shown in place of a value too wide for its label
pub const OVERFLOW: &str = "######";

fn render(value: fmt::Arguments<'_>, unit: &str) -> Label {
    let mut label = Label::new();
    if write!(label, "{}{}", value, unit).is_err() {
        debug!("Label value {} out of range", value);
        label.clear();
        let _ = write!(label, "{}{}", OVERFLOW, unit);
    }
    label
}

/// Pressure as `"{:6.0}Pa"`, e.g. `"100653Pa"`
pub fn pressure_label(reading: &Reading) -> Label {
    if reading.is_valid() {
        render(format_args!("{:6.0}", reading.pressure_pa), "Pa")
    } else {
        render(format_args!("{}", PLACEHOLDER), "Pa")
    }
}

/// Temperature as `"{:6.2}C"`, e.g. `" 25.08C"`
pub fn temperature_label(reading: &Reading) -> Label {
    if reading.is_valid() {
        render(format_args!("{:6.2}", reading.temperature_c), "C")
    } else {
        render(format_args!("{}", PLACEHOLDER), "C")
    }
}

pub fn status_line(snapshot: &StationSnapshot) -> StatusLine {
    let mut line = StatusLine::new();
    // Cannot overflow: the labels are bounded and the rest is fixed text
    let _ = write!(
        line,
        "BMP280 {} {} | SMP3011 {} {}",
        pressure_label(&snapshot.bmp280),
        temperature_label(&snapshot.bmp280),
        pressure_label(&snapshot.smp3011),
        temperature_label(&snapshot.smp3011),
    );
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::ReadingCache;

    #[test]
    fn test_fresh_labels() {
        let reading = Reading::fresh(25.08, 100_653.25, 1);
        assert_eq!(pressure_label(&reading).as_str(), "100653Pa");
        assert_eq!(temperature_label(&reading).as_str(), " 25.08C");
    }

    #[test]
    fn test_padding() {
        let reading = Reading::fresh(-4.5, 950.4, 1);
        assert_eq!(pressure_label(&reading).as_str(), "   950Pa");
        assert_eq!(temperature_label(&reading).as_str(), " -4.50C");
    }

    #[test]
    fn test_empty_cache_shows_placeholder() {
        assert_eq!(pressure_label(&Reading::EMPTY).as_str(), "  ----Pa");
        assert_eq!(temperature_label(&Reading::EMPTY).as_str(), "  ----C");
    }

    #[test]
    fn test_stale_keeps_last_value() {
        let cache = ReadingCache::new();
        cache.publish(Reading::fresh(21.5, 101_325.0, 3));
        cache.mark_stale();

        let reading = cache.snapshot();
        assert_eq!(pressure_label(&reading).as_str(), "101325Pa");
        assert_eq!(temperature_label(&reading).as_str(), " 21.50C");
    }

    #[test]
    fn test_out_of_range_value_is_marked() {
        let reading = Reading::fresh(-1_000.0, 1.0e9, 1);
        assert_eq!(pressure_label(&reading).as_str(), "######Pa");
        assert_eq!(temperature_label(&reading).as_str(), "######C");
    }

    #[test]
    fn test_widest_in_range_values_fit() {
        let reading = Reading::fresh(-40.0, 500_000.0, 1);
        assert_eq!(pressure_label(&reading).as_str(), "500000Pa");
        assert_eq!(temperature_label(&reading).as_str(), "-40.00C");

        let vacuum = Reading::fresh(150.0, -100_000.0, 1);
        assert_eq!(pressure_label(&vacuum).as_str(), "-100000Pa");
        assert_eq!(temperature_label(&vacuum).as_str(), "150.00C");
    }

    #[test]
    fn test_status_line_fits_widest_labels() {
        let wide = Reading::fresh(-40.0, 1.0e9, 1);
        let line = status_line(&StationSnapshot {
            bmp280: wide,
            smp3011: wide,
        });
        assert_eq!(
            line.as_str(),
            "BMP280 ######Pa -40.00C | SMP3011 ######Pa -40.00C"
        );
    }

    #[test]
    fn test_status_line() {
        let snapshot = StationSnapshot {
            bmp280: Reading::fresh(25.08, 100_653.25, 1),
            smp3011: Reading::EMPTY,
        };
        assert_eq!(
            status_line(&snapshot).as_str(),
            "BMP280 100653Pa  25.08C | SMP3011   ----Pa   ----C"
        );
    }
}
