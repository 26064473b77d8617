//! Read requests sent to a transport.

use crate::types::register::{DataType, RegisterConfig};

/// Modbus function codes used for reading meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// Read holding registers (0x03).
    #[default]
    ReadHoldingRegisters,
    /// Read input registers (0x04).
    ReadInputRegisters,
}

impl FunctionCode {
    /// Returns the function code byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
        }
    }
}

/// A register range to read from one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadRequest {
    /// Function code of the exchange.
    pub function: FunctionCode,
    /// Starting register address.
    pub register: u16,
    /// Number of registers.
    pub count: u16,
    /// Expected decoding of the payload.
    pub data_type: DataType,
}

impl ReadRequest {
    /// Creates a holding register request.
    #[must_use]
    pub const fn holding(register: u16, count: u16, data_type: DataType) -> Self {
        Self {
            function: FunctionCode::ReadHoldingRegisters,
            register,
            count,
            data_type,
        }
    }

    /// Creates an input register request.
    #[must_use]
    pub const fn input(register: u16, count: u16, data_type: DataType) -> Self {
        Self {
            function: FunctionCode::ReadInputRegisters,
            register,
            count,
            data_type,
        }
    }
}

impl From<&RegisterConfig> for ReadRequest {
    fn from(config: &RegisterConfig) -> Self {
        Self::holding(config.register, config.count, config.data_type)
    }
}
