//! Simulated bus master with BMP280 and SMP3011 register models
//!
//! Lets drivers, the bus channel and the station be exercised without
//! hardware. Faults can be injected per transaction, the bus can be made to
//! hang forever, and every transaction is traced with enter/exit events so
//! overlap can be detected.
//!
//! ## Usage
//!
//! ```ignore
//! let board = SimBoard::new().with_bmp280(0x76).with_smp3011(0x78);
//! let channel = BusChannel::new(board.bus());
//!
//! board.fail_next(SimFault::Timeout);
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{
    ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress,
};

use crate::bus::{BusMaster, PinConfig};

/// Events kept by the transaction trace
pub const TRACE_CAPACITY: usize = 256;

/// Highest bit rate the simulated master accepts (fast-mode plus)
pub const MAX_BIT_RATE: u32 = 1_000_000;

/// Trimming block of the datasheet worked example
pub const BMP280_REFERENCE_CALIBRATION: [u8; 24] = [
    0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C, 0x00,
    0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
];

/// Temperature ADC value of the datasheet worked example (25.08 °C)
pub const BMP280_REFERENCE_ADC_T: u32 = 519_888;
/// Pressure ADC value of the datasheet worked example (100653.27 Pa)
pub const BMP280_REFERENCE_ADC_P: u32 = 415_148;

const BMP280_SKIPPED: u32 = 0x80000;

const SMP3011_POWERED: u8 = 0x40;
const SMP3011_BUSY: u8 = 0x20;
const SMP3011_SATURATED: u8 = 0x01;

/// Condition a simulated transaction fails with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    NoAck,
    Timeout,
    ArbitrationLost,
}

impl SimFault {
    fn kind(self) -> ErrorKind {
        match self {
            Self::NoAck => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Self::Timeout => ErrorKind::Other,
            Self::ArbitrationLost => ErrorKind::ArbitrationLoss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError(ErrorKind);

impl embedded_hal_async::i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Why the simulated master refused `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedBitRate(pub u32);

/// One side of a traced transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Enter { address: u8, seq: u32 },
    Exit { address: u8, seq: u32 },
}

struct Bmp280Model {
    address: u8,
    registers: [u8; 256],
    pointer: u8,
    adc_t: u32,
    adc_p: u32,
    conversions: u32,
    resets: u32,
}

impl Bmp280Model {
    fn new(address: u8) -> Self {
        let mut registers = [0u8; 256];
        registers[0x88..0x88 + 24].copy_from_slice(&BMP280_REFERENCE_CALIBRATION);
        registers[0xD0] = 0x58;

        Self {
            address,
            registers,
            pointer: 0,
            adc_t: BMP280_REFERENCE_ADC_T,
            adc_p: BMP280_REFERENCE_ADC_P,
            conversions: 0,
            resets: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        // A lone byte only moves the register pointer; otherwise register/value pairs
        if let [register] = bytes {
            self.pointer = *register;
            return;
        }

        for pair in bytes.chunks_exact(2) {
            self.write_register(pair[0], pair[1]);
        }
    }

    fn write_register(&mut self, register: u8, value: u8) {
        match register {
            0xE0 if value == 0xB6 => {
                self.registers[0xF4] = 0;
                self.registers[0xF5] = 0;
                self.resets += 1;
            }
            0xF4 => {
                self.registers[0xF4] = value;
                if value & 0b11 != 0 {
                    self.convert(value);
                }
            }
            0xF5 => self.registers[0xF5] = value,
            _ => {}
        }
    }

    fn convert(&mut self, ctrl_meas: u8) {
        let adc_t = if ctrl_meas >> 5 == 0 {
            BMP280_SKIPPED
        } else {
            self.adc_t
        };
        let adc_p = if (ctrl_meas >> 2) & 0b111 == 0 {
            BMP280_SKIPPED
        } else {
            self.adc_p
        };

        let encode = |adc: u32| [(adc >> 12) as u8, (adc >> 4) as u8, ((adc & 0xF) << 4) as u8];
        self.registers[0xF7..0xFA].copy_from_slice(&encode(adc_p));
        self.registers[0xFA..0xFD].copy_from_slice(&encode(adc_t));

        // Forced mode drops back to sleep once the conversion is done
        self.registers[0xF4] &= !0b11;
        self.conversions += 1;
    }

    fn read(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.registers[self.pointer as usize];
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

struct Smp3011Model {
    address: u8,
    status: u8,
    raw_pressure: u32,
    raw_temperature: u16,
    busy_polls: u8,
    busy_remaining: u8,
    saturated: bool,
    conversions: u32,
}

impl Smp3011Model {
    fn new(address: u8) -> Self {
        Self {
            address,
            status: SMP3011_POWERED,
            raw_pressure: 1 << 23,
            raw_temperature: 1 << 15,
            busy_polls: 1,
            busy_remaining: 0,
            saturated: false,
            conversions: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if bytes.first() == Some(&0xAC) {
            self.busy_remaining = self.busy_polls;
            self.conversions += 1;
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        let mut status = self.status;
        if self.busy_remaining > 0 {
            status |= SMP3011_BUSY;
            self.busy_remaining -= 1;
        }
        if self.saturated {
            status |= SMP3011_SATURATED;
        }

        let p = self.raw_pressure.to_be_bytes();
        let t = self.raw_temperature.to_be_bytes();
        let frame = [status, p[1], p[2], p[3], t[0], t[1]];
        for (byte, value) in buffer.iter_mut().zip(frame.iter().chain(core::iter::repeat(&0))) {
            *byte = *value;
        }
    }
}

struct BoardState {
    bmp280: Option<Bmp280Model>,
    smp3011: Option<Smp3011Model>,
    fault: Option<(u32, SimFault)>,
    hang: bool,
    seq: u32,
    in_flight: u8,
    max_in_flight: u8,
    trace: heapless::Vec<TraceEvent, TRACE_CAPACITY>,
}

impl BoardState {
    fn enter(&mut self, address: u8) -> u32 {
        let seq = self.seq;
        self.seq += 1;
        self.in_flight += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight);
        let _ = self.trace.push(TraceEvent::Enter { address, seq });
        seq
    }

    fn exit(&mut self, address: u8, seq: u32) {
        self.in_flight -= 1;
        let _ = self.trace.push(TraceEvent::Exit { address, seq });
    }

    fn take_fault(&mut self) -> Option<SimFault> {
        match self.fault {
            Some((0, fault)) => {
                self.fault = None;
                Some(fault)
            }
            Some((n, fault)) => {
                self.fault = Some((n - 1, fault));
                None
            }
            None => None,
        }
    }

    fn dispatch(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), SimError> {
        if let Some(fault) = self.take_fault() {
            return Err(SimError(fault.kind()));
        }

        if let Some(bmp) = self.bmp280.as_mut().filter(|m| m.address == address) {
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => bmp.write(bytes),
                    Operation::Read(buffer) => bmp.read(buffer),
                }
            }
            return Ok(());
        }

        if let Some(smp) = self.smp3011.as_mut().filter(|m| m.address == address) {
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => smp.write(bytes),
                    Operation::Read(buffer) => smp.read(buffer),
                }
            }
            return Ok(());
        }

        Err(SimError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)))
    }
}

/// A board with up to one BMP280 and one SMP3011 on its bus
pub struct SimBoard {
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<BoardState>>,
}

impl SimBoard {
    /// Board with nothing on the bus
    pub const fn new() -> Self {
        Self {
            state: BlockingMutex::new(RefCell::new(BoardState {
                bmp280: None,
                smp3011: None,
                fault: None,
                hang: false,
                seq: 0,
                in_flight: 0,
                max_in_flight: 0,
                trace: heapless::Vec::new(),
            })),
        }
    }

    pub fn with_bmp280(self, address: u8) -> Self {
        self.with(|s| s.bmp280 = Some(Bmp280Model::new(address)));
        self
    }

    pub fn with_smp3011(self, address: u8) -> Self {
        self.with(|s| s.smp3011 = Some(Smp3011Model::new(address)));
        self
    }

    fn with<R>(&self, f: impl FnOnce(&mut BoardState) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Bus master handle for a [`crate::bus::BusChannel`]
    pub fn bus(&self) -> SimBus<'_> {
        SimBus { board: self }
    }

    /// Fail the next transaction
    pub fn fail_next(&self, fault: SimFault) {
        self.fail_after(0, fault);
    }

    /// Let `successes` transactions through, then fail one
    pub fn fail_after(&self, successes: u32, fault: SimFault) {
        self.with(|s| s.fault = Some((successes, fault)));
    }

    /// Make every transaction block forever once it has started
    pub fn set_hang(&self, hang: bool) {
        self.with(|s| s.hang = hang);
    }

    pub fn set_bmp280_chip_id(&self, id: u8) {
        self.with(|s| {
            if let Some(bmp) = s.bmp280.as_mut() {
                bmp.registers[0xD0] = id;
            }
        });
    }

    /// ADC values the next BMP280 conversion will produce
    pub fn set_bmp280_adc(&self, adc_t: u32, adc_p: u32) {
        self.with(|s| {
            if let Some(bmp) = s.bmp280.as_mut() {
                bmp.adc_t = adc_t & 0xF_FFFF;
                bmp.adc_p = adc_p & 0xF_FFFF;
            }
        });
    }

    pub fn bmp280_register(&self, register: u8) -> u8 {
        self.with(|s| {
            s.bmp280
                .as_ref()
                .map_or(0, |bmp| bmp.registers[register as usize])
        })
    }

    pub fn bmp280_conversions(&self) -> u32 {
        self.with(|s| s.bmp280.as_ref().map_or(0, |bmp| bmp.conversions))
    }

    pub fn bmp280_resets(&self) -> u32 {
        self.with(|s| s.bmp280.as_ref().map_or(0, |bmp| bmp.resets))
    }

    /// Base status byte (busy and saturation bits are added by the model)
    pub fn set_smp3011_status(&self, status: u8) {
        self.with(|s| {
            if let Some(smp) = s.smp3011.as_mut() {
                smp.status = status;
            }
        });
    }

    /// Output words the SMP3011 reports
    pub fn set_smp3011_raw(&self, pressure: u32, temperature: u16) {
        self.with(|s| {
            if let Some(smp) = s.smp3011.as_mut() {
                smp.raw_pressure = pressure & 0xFF_FFFF;
                smp.raw_temperature = temperature;
            }
        });
    }

    /// Status reads that report busy after each conversion command
    pub fn set_smp3011_busy_polls(&self, polls: u8) {
        self.with(|s| {
            if let Some(smp) = s.smp3011.as_mut() {
                smp.busy_polls = polls;
            }
        });
    }

    pub fn set_smp3011_saturated(&self, saturated: bool) {
        self.with(|s| {
            if let Some(smp) = s.smp3011.as_mut() {
                smp.saturated = saturated;
            }
        });
    }

    pub fn smp3011_conversions(&self) -> u32 {
        self.with(|s| s.smp3011.as_ref().map_or(0, |smp| smp.conversions))
    }

    /// Transactions started so far
    pub fn transaction_count(&self) -> u32 {
        self.with(|s| s.seq)
    }

    /// Most transactions ever in flight at the same time
    pub fn max_in_flight(&self) -> u8 {
        self.with(|s| s.max_in_flight)
    }

    pub fn trace(&self) -> heapless::Vec<TraceEvent, TRACE_CAPACITY> {
        self.with(|s| s.trace.clone())
    }

    pub fn clear_trace(&self) {
        self.with(|s| s.trace.clear());
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus master view of a [`SimBoard`]
pub struct SimBus<'a> {
    board: &'a SimBoard,
}

impl ErrorType for SimBus<'_> {
    type Error = SimError;
}

impl I2c<SevenBitAddress> for SimBus<'_> {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let seq = self.board.with(|s| s.enter(address));

        // Give other tasks a chance to run mid-transaction
        embassy_futures::yield_now().await;

        if self.board.with(|s| s.hang) {
            core::future::pending::<()>().await;
        }

        let result = self.board.with(|s| s.dispatch(address, operations));
        self.board.with(|s| s.exit(address, seq));
        result
    }
}

impl BusMaster for SimBus<'_> {
    type OpenError = UnsupportedBitRate;

    fn open(&mut self, _pins: &PinConfig, bit_rate: u32) -> Result<(), Self::OpenError> {
        if bit_rate == 0 || bit_rate > MAX_BIT_RATE {
            return Err(UnsupportedBitRate(bit_rate));
        }
        Ok(())
    }
}

/// Delay that returns immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantDelay;

impl DelayNs for InstantDelay {
    async fn delay_ns(&mut self, _ns: u32) {
        embassy_futures::yield_now().await;
    }
}
