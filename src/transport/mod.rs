//! Transport layer for meter communication.
//!
//! A [`Transport`] performs one blocking request/response exchange with a
//! unit on a shared link. Two implementations are provided on top of
//! `tokio-modbus`: Modbus TCP ([`TcpTransport`]) and Modbus RTU over a
//! serial port ([`RtuTransport`]).

pub mod rtu;
pub mod tcp;

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext};

use crate::error::TransportError;
use crate::types::{FunctionCode, ReadRequest};

/// Default timeout of one exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcast address; reads addressed to it never get an answer.
pub const BROADCAST_UNIT: u8 = 0;

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Connects to the link.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Disconnects from the link.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Performs one exchange with a unit.
    ///
    /// `Ok(None)` means the exchange completed without a result object.
    fn execute(
        &mut self,
        unit: u8,
        request: ReadRequest,
    ) -> BoxFuture<'_, Result<Option<Vec<u16>>, TransportError>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        (**self).disconnect()
    }

    fn execute(
        &mut self,
        unit: u8,
        request: ReadRequest,
    ) -> BoxFuture<'_, Result<Option<Vec<u16>>, TransportError>> {
        (**self).execute(unit, request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Runs one read on a `tokio-modbus` context.
pub(crate) async fn exchange(
    ctx: &mut Context,
    unit: u8,
    request: ReadRequest,
    timeout: Duration,
) -> Result<Option<Vec<u16>>, TransportError> {
    if unit == BROADCAST_UNIT {
        return Err(TransportError::InvalidUnit { unit });
    }
    ctx.set_slave(Slave(unit));

    let read = async {
        match request.function {
            FunctionCode::ReadHoldingRegisters => {
                ctx.read_holding_registers(request.register, request.count)
                    .await
            }
            FunctionCode::ReadInputRegisters => {
                ctx.read_input_registers(request.register, request.count)
                    .await
            }
        }
    };

    match tokio::time::timeout(timeout, read).await {
        Err(_) => Err(TransportError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
        Ok(Err(e)) => Err(map_modbus_error(unit, e)),
        Ok(Ok(Err(code))) => Err(map_exception(unit, u8::from(code))),
        Ok(Ok(Ok(words))) => Ok(Some(words)),
    }
}

/// Maps a Modbus exception code onto the transport taxonomy.
///
/// A gateway without a path to the unit reports the unit as invalid.
fn map_exception(unit: u8, code: u8) -> TransportError {
    if code == TransportError::GATEWAY_PATH_UNAVAILABLE {
        TransportError::InvalidUnit { unit }
    } else {
        TransportError::Exception { code }
    }
}

/// Maps a `tokio-modbus` failure onto the transport taxonomy.
fn map_modbus_error(unit: u8, error: tokio_modbus::Error) -> TransportError {
    match error {
        tokio_modbus::Error::Transport(e) => TransportError::Io(e),
        tokio_modbus::Error::Protocol(e) => {
            if matches!(e, tokio_modbus::ProtocolError::HeaderMismatch { .. }) {
                TransportError::AddressMismatch {
                    expected: unit,
                    detail: e.to_string(),
                }
            } else {
                TransportError::Protocol {
                    message: e.to_string(),
                }
            }
        }
    }
}

pub use rtu::{RtuTransport, SerialConfig};
pub use tcp::{TcpConfig, TcpTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_path_unavailable_is_invalid_unit() {
        let err = map_exception(30, 0x0A);
        assert!(matches!(err, TransportError::InvalidUnit { unit: 30 }));
        assert!(err.is_mix_up());
    }

    #[test]
    fn test_other_exceptions_keep_their_code() {
        assert!(matches!(
            map_exception(30, 0x0B),
            TransportError::Exception { code: 0x0B }
        ));
        assert!(matches!(
            map_exception(30, 0x02),
            TransportError::Exception { code: 0x02 }
        ));
    }
}
