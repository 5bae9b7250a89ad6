//! Host simulator for the twinbaro station.
//!
//! Runs the real drivers against a simulated BMP280 and SMP3011 sharing one
//! bus, printing the display labels every poll cycle. The simulated air
//! pressure drifts slowly and every seventh cycle a bus timeout is injected so
//! the stale-reading path can be watched.
//!
//! # Usage
//!
//! ```text
//! RUST_LOG=debug twinbaro-simulator [cycles]
//! ```
//!
//! Without `cycles` the simulator runs until interrupted.

use std::time::Duration;

use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;
use log::{error, info};

use twinbaro::labels::status_line;
use twinbaro::sensors::smp3011::PRESSURE_FULL_SCALE;
use twinbaro::sim::{self, SimBoard, SimFault};
use twinbaro::{BusChannel, PortRegistry, Station, StationCaches, StationConfig};

/// Every n-th cycle fails with a bus timeout
const FAULT_EVERY: u32 = 7;

/// Delay backed by the host thread scheduler
#[derive(Clone, Copy)]
struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns as u64));
    }
}

/// Synthetic air pressure and temperature that vary over time
struct Weather {
    elapsed_secs: f32,
}

impl Weather {
    fn advance(&mut self, dt_secs: f32) -> (f32, f32) {
        self.elapsed_secs += dt_secs;
        let t = self.elapsed_secs;

        let pressure_pa = 101_325.0 + 250.0 * (t / 90.0).sin();
        let temperature_c = 21.0 + 2.0 * (t / 60.0).cos();
        (pressure_pa, temperature_c)
    }
}

/// Output words the SMP3011 would report for the given conditions
fn smp3011_raw(config: &StationConfig, pressure_pa: f32, temperature_c: f32) -> (u32, u16) {
    let range = config.smp3011.range;
    let span = (pressure_pa - range.min_pa as f32) / (range.max_pa - range.min_pa) as f32;
    let pressure = ((0.15 + 0.7 * span) * PRESSURE_FULL_SCALE) as u32;
    let temperature = ((temperature_c + 40.0) / 190.0 * 65_536.0) as u16;
    (pressure, temperature)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cycles: Option<u32> = std::env::args().nth(1).and_then(|arg| arg.parse().ok());
    let config = StationConfig::default();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return;
    }

    let board = SimBoard::new()
        .with_bmp280(config.bmp280.address)
        .with_smp3011(config.smp3011.address);

    let ports = PortRegistry::new();
    let channel = BusChannel::new(board.bus());
    if let Err(e) = channel.configure(&ports, config.bus.pins) {
        error!("Bus configuration failed: {}", e);
        return;
    }
    if let Err(e) = block_on(channel.open(config.bus.bit_rate)) {
        error!("Bus open failed: {}", e);
        return;
    }

    let caches = StationCaches::new();
    let mut station = match Station::new(&channel, &caches, &config, StdDelay) {
        Ok(station) => station,
        Err(e) => {
            error!("Attaching sensors failed: {}", e);
            return;
        }
    };

    if let Err(e) = block_on(station.initialize()) {
        // The other sensor keeps running
        error!("Station initialization incomplete: {}", e);
    }

    let interval = Duration::from_millis(config.poll_interval_ms as u64);
    let mut weather = Weather { elapsed_secs: 0.0 };
    let mut cycle = 0u32;

    info!("Polling every {} ms", config.poll_interval_ms);
    while cycles.is_none_or(|limit| cycle < limit) {
        cycle += 1;

        let (pressure_pa, temperature_c) = weather.advance(interval.as_secs_f32());
        let (raw_p, raw_t) = smp3011_raw(&config, pressure_pa, temperature_c);
        board.set_smp3011_raw(raw_p, raw_t);

        // Small wiggle around the reference conversion
        let wiggle = (pressure_pa - 101_325.0) as i32;
        board.set_bmp280_adc(
            sim::BMP280_REFERENCE_ADC_T.wrapping_add_signed(wiggle / 4),
            sim::BMP280_REFERENCE_ADC_P.wrapping_add_signed(-wiggle),
        );

        if cycle % FAULT_EVERY == 0 {
            board.fail_next(SimFault::Timeout);
        }

        let report = block_on(station.poll());
        println!("[{:4}] {}", cycle, status_line(&station.snapshot()));
        if !report.all_updated() {
            info!("Cycle {}: {:?}", cycle, report);
        }

        std::thread::sleep(interval);
    }
}
