//! Error taxonomy for the bus and sensor layers
//!
//! Setup-time failures (`ConfigurationError`, `BusOpenError`,
//! `IdentityMismatch`) are fatal and escape to the caller. Transaction
//! failures are recoverable: drivers absorb them inside `sample()` and keep
//! serving the last valid reading.

use thiserror_no_std::Error;

/// Channel setup failures. Fatal at startup.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Another channel already claimed this hardware port
    #[error("Bus port {port} is already configured")]
    PortInUse {
        /// The contested port
        port: u8,
    },

    /// `configure` was called twice on the same channel
    #[error("Channel is already configured on port {port}")]
    AlreadyConfigured {
        /// Port the channel is bound to
        port: u8,
    },

    /// Port number outside what the registry can track
    #[error("Bus port {port} is out of range (max: {max})")]
    PortOutOfRange {
        /// Requested port
        port: u8,
        /// Highest valid port number
        max: u8,
    },

    /// A device with this address is already attached to the channel
    #[error("Device address {address:#04x} is already attached")]
    AddressInUse {
        /// The duplicate address
        address: u8,
    },

    /// Address is not a valid 7-bit device address
    #[error("Invalid 7-bit device address {address:#04x}")]
    InvalidAddress {
        /// The rejected address
        address: u8,
    },

    /// No room left in the attached-device table
    #[error("Attached device capacity exceeded (max: {max})")]
    TooManyDevices {
        /// Maximum attachable devices
        max: usize,
    },
}

/// Failures while committing a channel configuration. Fatal at startup.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOpenError {
    /// `open` called before `configure`
    #[error("Channel must be configured before it is opened")]
    NotConfigured,

    /// `open` called on a channel that is already open
    #[error("Channel on port {port} is already open")]
    AlreadyOpen {
        /// Port the channel is bound to
        port: u8,
    },

    /// Hardware refused the bit rate or pin assignment
    #[error("Bus master rejected bit rate {bit_rate} Hz on port {port}")]
    Rejected {
        /// Port being opened
        port: u8,
        /// Requested bit rate
        bit_rate: u32,
    },
}

/// What went wrong during a single bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Device did not acknowledge its address or a data byte
    NoAck,
    /// Hardware gave up waiting for the bus
    Timeout,
    /// Another master won arbitration
    ArbitrationLost,
    /// Bus error or overrun reported by the hardware
    Bus,
    /// Channel has not been opened yet
    NotOpen,
    /// Requested read exceeds the transfer buffer
    Overlength,
}

impl From<embedded_hal::i2c::ErrorKind> for TransactionErrorKind {
    fn from(kind: embedded_hal::i2c::ErrorKind) -> Self {
        use embedded_hal::i2c::ErrorKind;

        match kind {
            ErrorKind::NoAcknowledge(_) => Self::NoAck,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLost,
            ErrorKind::Bus | ErrorKind::Overrun => Self::Bus,
            // embedded-hal has no timeout kind; bus masters report it as `Other`
            _ => Self::Timeout,
        }
    }
}

/// A failed transaction. Recoverable: retry on the next poll cycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Transaction with device {address:#04x} failed: {kind:?}")]
pub struct TransactionError {
    /// Addressed device
    pub address: u8,
    /// Failure classification
    pub kind: TransactionErrorKind,
}

impl TransactionError {
    pub const fn new(address: u8, kind: TransactionErrorKind) -> Self {
        Self { address, kind }
    }
}

/// The device answering at an address is not the expected part
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{sensor} at {address:#04x}: expected identity {expected:#04x}, found {found:#04x}")]
pub struct IdentityMismatch {
    /// Driver family name
    pub sensor: &'static str,
    /// Device address probed
    pub address: u8,
    /// Signature the driver expects
    pub expected: u8,
    /// Value actually read back
    pub found: u8,
}

/// Crate-wide error, returned by setup operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Bus open error: {0}")]
    BusOpen(#[from] BusOpenError),
    #[error("Bus transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Identity mismatch: {0}")]
    IdentityMismatch(#[from] IdentityMismatch),
}

/// Result type for setup operations
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            TransactionErrorKind::from(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
            TransactionErrorKind::NoAck
        );
        assert_eq!(
            TransactionErrorKind::from(ErrorKind::ArbitrationLoss),
            TransactionErrorKind::ArbitrationLost
        );
        assert_eq!(
            TransactionErrorKind::from(ErrorKind::Overrun),
            TransactionErrorKind::Bus
        );
        assert_eq!(
            TransactionErrorKind::from(ErrorKind::Other),
            TransactionErrorKind::Timeout
        );
    }

    #[test]
    fn test_setup_errors_convert() {
        let err: Error = IdentityMismatch {
            sensor: "BMP280",
            address: 0x76,
            expected: 0x58,
            found: 0x60,
        }
        .into();
        assert!(matches!(err, Error::IdentityMismatch(m) if m.found == 0x60));

        let err: Error = BusOpenError::NotConfigured.into();
        assert_eq!(err, Error::BusOpen(BusOpenError::NotConfigured));
    }
}
