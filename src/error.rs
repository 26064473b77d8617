//! Error types for the meterpoll library.

use thiserror::Error;

/// The main error type for meterpoll operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// A register read failed.
    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// Raw registers could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A task with the same name is already registered.
    #[error("task '{name}' is already registered")]
    DuplicateTask { name: String },

    /// Task interval must be positive and at most one year.
    #[error("task '{name}' has an invalid interval")]
    InvalidInterval { name: String },

    /// Configuration value out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Failure of a single `read_registers` call.
///
/// Every variant evicts the cache entry of the failed request. Mix-ups
/// additionally evict every entry of the addressed device, see
/// [`ReadError::is_mix_up`].
#[derive(Debug, Error)]
pub enum ReadError {
    /// The transport returned no result object.
    #[error("null response from unit {unit}, register 0x{register:04X}")]
    NullResponse { unit: u8, register: u16 },

    /// The transport returned a result without any register.
    #[error("empty response from unit {unit}, register 0x{register:04X}")]
    EmptyResponse { unit: u8, register: u16 },

    /// The transport exchange itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReadError {
    /// Returns true if the failure means a response was attributed to the
    /// wrong device, so nothing recently cached for that device is trusted.
    #[must_use]
    pub const fn is_mix_up(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_mix_up(),
            Self::NullResponse { .. } | Self::EmptyResponse { .. } => false,
        }
    }
}

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response within the exchange timeout.
    #[error("exchange timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device answered with a Modbus exception.
    #[error("device exception (code = {code})")]
    Exception { code: u8 },

    /// The response does not belong to the addressed unit.
    #[error("response does not match unit {expected}: {detail}")]
    AddressMismatch { expected: u8, detail: String },

    /// The transport rejected the unit id.
    #[error("invalid unit id {unit}")]
    InvalidUnit { unit: u8 },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Any other protocol level failure.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl TransportError {
    /// Modbus exception code 0x0A, the gateway has no path to the unit.
    pub const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

    /// Modbus exception code 0x0B, the gateway got no answer from the target.
    ///
    /// On a shared gateway this shows up when answers from different units
    /// get crossed, so it counts as a mix-up.
    pub const GATEWAY_TARGET_NO_RESPONSE: u8 = 0x0B;

    /// Returns true for addressing collisions.
    #[must_use]
    pub const fn is_mix_up(&self) -> bool {
        matches!(
            self,
            Self::AddressMismatch { .. }
                | Self::InvalidUnit { .. }
                | Self::Exception {
                    code: Self::GATEWAY_TARGET_NO_RESPONSE
                }
        )
    }

    /// Returns true if no response arrived within the exchange timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the connection state is unknown after this error and
    /// the link should be re-established before the next exchange.
    #[must_use]
    pub const fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Io(_)
                | Self::AddressMismatch { .. }
                | Self::Protocol { .. }
                | Self::Exception {
                    code: Self::GATEWAY_TARGET_NO_RESPONSE
                }
        )
    }
}

/// Register decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The register count does not fit the requested data type.
    #[error("{data_type} cannot be decoded from {count} registers")]
    UnsupportedCount {
        data_type: crate::types::DataType,
        count: usize,
    },
}

/// Error type returned by task callbacks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for meterpoll operations.
pub type Result<T> = std::result::Result<T, Error>;
