//! Shared I2C bus channel
//!
//! A [`BusChannel`] owns one bus master and hands out addressed
//! [`BusDevice`] handles. Every transaction takes the channel's async mutex
//! for its whole duration, so transactions from different drivers never
//! interleave regardless of how the callers are scheduled.
//!
//! # Example
//!
//! ```ignore
//! static PORTS: PortRegistry = PortRegistry::new();
//! static CHANNEL: StaticCell<BusChannel<I2c<'static, Async>>> = StaticCell::new();
//!
//! let channel = CHANNEL.init(BusChannel::new(i2c));
//! channel.configure(&PORTS, PinConfig { port: 1, sda: 33, scl: 32 })?;
//! channel.open(100_000).await?;
//!
//! let bmp280 = channel.attach(0x76)?;
//! let smp3011 = channel.attach(0x78)?;
//! ```

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{Error as _, I2c};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::error::{BusOpenError, ConfigurationError, TransactionError, TransactionErrorKind};

/// Largest read a single `transact` call can return
pub const MAX_TRANSFER_LEN: usize = 32;

/// Devices a single channel can have attached at once
pub const MAX_ATTACHED_DEVICES: usize = 8;

/// Number of hardware ports a [`PortRegistry`] tracks
pub const MAX_PORTS: u8 = 8;

/// Bytes returned by [`BusChannel::transact`]
pub type Transfer = heapless::Vec<u8, MAX_TRANSFER_LEN>;

/// Electrical binding of a channel: port and data/clock pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub port: u8,
    pub sda: u8,
    pub scl: u8,
}

/// Hardware bus master a channel drives.
///
/// Transactions come from the `embedded-hal-async` I2C trait; `open`
/// applies the pin assignment and bit rate.
pub trait BusMaster: I2c {
    /// Hardware-specific reason for refusing a configuration
    type OpenError: core::fmt::Debug;

    /// Apply pins and bit rate. Called once, from [`BusChannel::open`].
    fn open(&mut self, pins: &PinConfig, bit_rate: u32) -> Result<(), Self::OpenError>;
}

/// Claims hardware ports so no two channels configure the same one
pub struct PortRegistry {
    claimed: BlockingMutex<CriticalSectionRawMutex, Cell<u8>>,
}

impl PortRegistry {
    pub const fn new() -> Self {
        Self {
            claimed: BlockingMutex::new(Cell::new(0)),
        }
    }

    fn claim(&self, port: u8) -> Result<(), ConfigurationError> {
        if port >= MAX_PORTS {
            return Err(ConfigurationError::PortOutOfRange {
                port,
                max: MAX_PORTS - 1,
            });
        }

        self.claimed.lock(|claimed| {
            let mask = 1u8 << port;
            if claimed.get() & mask != 0 {
                return Err(ConfigurationError::PortInUse { port });
            }
            claimed.set(claimed.get() | mask);
            Ok(())
        })
    }

    /// Whether a channel has already configured `port`
    pub fn is_claimed(&self, port: u8) -> bool {
        port < MAX_PORTS && self.claimed.lock(|claimed| claimed.get() & (1 << port) != 0)
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unconfigured,
    Configured(PinConfig),
    Open { pins: PinConfig, bit_rate: u32 },
}

/// One physical bus port shared by several addressed devices
pub struct BusChannel<M> {
    master: Mutex<CriticalSectionRawMutex, M>,
    state: BlockingMutex<CriticalSectionRawMutex, Cell<ChannelState>>,
    attached: BlockingMutex<CriticalSectionRawMutex, RefCell<heapless::Vec<u8, MAX_ATTACHED_DEVICES>>>,
}

impl<M: BusMaster> BusChannel<M> {
    pub const fn new(master: M) -> Self {
        Self {
            master: Mutex::new(master),
            state: BlockingMutex::new(Cell::new(ChannelState::Unconfigured)),
            attached: BlockingMutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Bind the channel to a port and pin pair.
    ///
    /// Fails if this channel is already configured or another channel
    /// holds the port.
    pub fn configure(&self, ports: &PortRegistry, pins: PinConfig) -> Result<(), ConfigurationError> {
        if let ChannelState::Configured(current) | ChannelState::Open { pins: current, .. } =
            self.state()
        {
            return Err(ConfigurationError::AlreadyConfigured { port: current.port });
        }

        ports.claim(pins.port)?;
        self.state.lock(|state| state.set(ChannelState::Configured(pins)));

        info!(
            "Bus port {} configured (SDA {}, SCL {})",
            pins.port, pins.sda, pins.scl
        );
        Ok(())
    }

    /// Commit the configuration at `bit_rate` and accept transactions
    pub async fn open(&self, bit_rate: u32) -> Result<(), BusOpenError> {
        // State is checked and set under the master lock so concurrent
        // `open` calls cannot both commit
        let mut master = self.master.lock().await;
        let pins = match self.state() {
            ChannelState::Unconfigured => return Err(BusOpenError::NotConfigured),
            ChannelState::Open { pins, .. } => {
                return Err(BusOpenError::AlreadyOpen { port: pins.port });
            }
            ChannelState::Configured(pins) => pins,
        };

        master.open(&pins, bit_rate).map_err(|e| {
            error!(
                "Bus master rejected {} Hz on port {}: {:?}",
                bit_rate, pins.port, e
            );
            BusOpenError::Rejected {
                port: pins.port,
                bit_rate,
            }
        })?;

        self.state
            .lock(|state| state.set(ChannelState::Open { pins, bit_rate }));
        info!("Bus port {} open at {} Hz", pins.port, bit_rate);
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.state.lock(|state| state.get())
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), ChannelState::Open { .. })
    }

    /// Reserve `address` on this channel and return a handle for it.
    ///
    /// The address is released when the handle is dropped.
    pub fn attach(&self, address: u8) -> Result<BusDevice<'_, M>, ConfigurationError> {
        if address > 0x7F {
            return Err(ConfigurationError::InvalidAddress { address });
        }

        self.attached.lock(|attached| {
            let mut attached = attached.borrow_mut();
            if attached.contains(&address) {
                return Err(ConfigurationError::AddressInUse { address });
            }
            attached
                .push(address)
                .map_err(|_| ConfigurationError::TooManyDevices {
                    max: MAX_ATTACHED_DEVICES,
                })
        })?;

        debug!("Device {:#04x} attached", address);
        Ok(BusDevice {
            channel: self,
            address,
        })
    }

    /// Whether a device handle currently holds `address`
    pub fn is_attached(&self, address: u8) -> bool {
        self.attached
            .lock(|attached| attached.borrow().contains(&address))
    }

    fn detach(&self, address: u8) {
        self.attached.lock(|attached| {
            attached.borrow_mut().retain(|&a| a != address);
        });
    }

    /// One exchange with `address`: write `write`, then fill `read`.
    ///
    /// Either half may be empty. The channel lock is held for the whole
    /// exchange.
    pub async fn transact_into(
        &self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), TransactionError> {
        if !self.is_open() {
            return Err(TransactionError::new(address, TransactionErrorKind::NotOpen));
        }

        let mut master = self.master.lock().await;
        let result = match (write.is_empty(), read.is_empty()) {
            (_, true) => master.write(address, write).await,
            (true, false) => master.read(address, read).await,
            (false, false) => master.write_read(address, write, read).await,
        };

        result.map_err(|e| {
            debug!("I2C transaction with {:#04x} failed: {:?}", address, e);
            TransactionError::new(address, e.kind().into())
        })
    }

    /// One exchange with `address` returning `read_len` bytes
    pub async fn transact(
        &self,
        address: u8,
        write: &[u8],
        read_len: usize,
    ) -> Result<Transfer, TransactionError> {
        let mut buffer = Transfer::new();
        buffer
            .resize_default(read_len)
            .map_err(|_| TransactionError::new(address, TransactionErrorKind::Overlength))?;

        self.transact_into(address, write, &mut buffer).await?;
        Ok(buffer)
    }
}

/// Addressed handle onto a [`BusChannel`]
pub struct BusDevice<'a, M: BusMaster> {
    channel: &'a BusChannel<M>,
    address: u8,
}

impl<M: BusMaster> BusDevice<'_, M> {
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Write-only exchange
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), TransactionError> {
        self.channel.transact_into(self.address, bytes, &mut []).await
    }

    /// Read-only exchange
    pub async fn read(&mut self, buffer: &mut [u8]) -> Result<(), TransactionError> {
        self.channel.transact_into(self.address, &[], buffer).await
    }

    /// Burst-read starting at `register`
    pub async fn read_registers(
        &mut self,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<(), TransactionError> {
        self.channel
            .transact_into(self.address, &[register], buffer)
            .await
    }

    /// Write a single register
    pub async fn write_register(&mut self, register: u8, value: u8) -> Result<(), TransactionError> {
        self.write(&[register, value]).await
    }

    /// Write-then-read returning `read_len` bytes
    pub async fn transact(
        &mut self,
        write: &[u8],
        read_len: usize,
    ) -> Result<Transfer, TransactionError> {
        self.channel.transact(self.address, write, read_len).await
    }
}

impl<M: BusMaster> Drop for BusDevice<'_, M> {
    fn drop(&mut self) {
        self.channel.detach(self.address);
    }
}
