//! Calibrated readings and the cache display code reads them from

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// How much a [`Reading`] can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// No sample has ever succeeded
    Empty,
    /// Produced by the most recent sample cycle
    Fresh,
    /// Last valid values, kept after one or more failed cycles
    Stale,
}

/// One calibrated temperature/pressure pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature_c: f32,
    /// Pascal
    pub pressure_pa: f32,
    pub validity: Validity,
    /// Sample cycle that produced these values
    pub cycle: u32,
}

impl Reading {
    pub const EMPTY: Self = Self {
        temperature_c: 0.0,
        pressure_pa: 0.0,
        validity: Validity::Empty,
        cycle: 0,
    };

    pub const fn fresh(temperature_c: f32, pressure_pa: f32, cycle: u32) -> Self {
        Self {
            temperature_c,
            pressure_pa,
            validity: Validity::Fresh,
            cycle,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity != Validity::Empty
    }

    pub fn is_fresh(&self) -> bool {
        self.validity == Validity::Fresh
    }

    /// Cycles elapsed since these values were produced.
    ///
    /// `None` while the reading is still empty.
    pub fn age(&self, current_cycle: u32) -> Option<u32> {
        self.is_valid()
            .then(|| current_cycle.wrapping_sub(self.cycle))
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Latest reading of one driver.
///
/// Writes replace the whole tuple inside a critical section, so a reader
/// never sees the temperature of one cycle paired with the pressure of
/// another. Reads never wait on the bus.
pub struct ReadingCache {
    inner: BlockingMutex<CriticalSectionRawMutex, Cell<Reading>>,
}

impl ReadingCache {
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(Cell::new(Reading::EMPTY)),
        }
    }

    /// Consistent copy of the current tuple
    pub fn snapshot(&self) -> Reading {
        self.inner.lock(|cell| cell.get())
    }

    pub fn temperature(&self) -> f32 {
        self.snapshot().temperature_c
    }

    pub fn pressure(&self) -> f32 {
        self.snapshot().pressure_pa
    }

    /// Replace the tuple with a freshly computed one
    pub fn publish(&self, reading: Reading) {
        self.inner.lock(|cell| cell.set(reading));
    }

    /// Keep the values but flag them as not confirmed by the last cycle.
    ///
    /// An empty cache stays empty.
    pub fn mark_stale(&self) {
        self.inner.lock(|cell| {
            let mut reading = cell.get();
            if reading.validity == Validity::Fresh {
                reading.validity = Validity::Stale;
                cell.set(reading);
            }
        });
    }
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_is_empty() {
        let cache = ReadingCache::new();
        let reading = cache.snapshot();

        assert_eq!(reading.validity, Validity::Empty);
        assert!(!reading.is_valid());
        assert_eq!(reading.age(10), None);
    }

    #[test]
    fn test_publish_then_stale_keeps_values() {
        let cache = ReadingCache::new();
        cache.publish(Reading::fresh(20.0, 101_325.0, 3));
        cache.mark_stale();

        let reading = cache.snapshot();
        assert_eq!(reading.temperature_c, 20.0);
        assert_eq!(reading.pressure_pa, 101_325.0);
        assert_eq!(reading.validity, Validity::Stale);
        assert_eq!(reading.age(5), Some(2));
    }

    #[test]
    fn test_mark_stale_on_empty_cache() {
        let cache = ReadingCache::new();
        cache.mark_stale();
        assert_eq!(cache.snapshot(), Reading::EMPTY);
    }

    #[test]
    fn test_publish_overwrites_stale() {
        let cache = ReadingCache::new();
        cache.publish(Reading::fresh(20.0, 101_325.0, 1));
        cache.mark_stale();
        cache.publish(Reading::fresh(21.5, 100_900.0, 2));

        let reading = cache.snapshot();
        assert!(reading.is_fresh());
        assert_eq!(cache.temperature(), 21.5);
        assert_eq!(cache.pressure(), 100_900.0);
    }
}
