//! Modbus RTU transport over a serial port.
//!
//! All meters on one RS-485 segment share this transport.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_modbus::client::{Context, rtu};
use tokio_serial::SerialPortBuilderExt;

use crate::error::{Error, Result, TransportError};
use crate::transport::{DEFAULT_TIMEOUT, Transport, exchange};
use crate::types::ReadRequest;

/// Default baud rate for electricity meters.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of one exchange.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the exchange timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Modbus RTU transport.
pub struct RtuTransport {
    config: SerialConfig,
    ctx: Option<Context>,
}

impl RtuTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config, ctx: None }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    fn open(&mut self) -> std::result::Result<(), TransportError> {
        tracing::info!(
            "opening serial port {} at {} baud",
            self.config.port,
            self.config.baud_rate
        );

        let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::Io(e.into()))?;

        self.ctx = Some(rtu::attach(stream));
        Ok(())
    }
}

impl Transport for RtuTransport {
    fn connect(&mut self) -> BoxFuture<'_, std::result::Result<(), TransportError>> {
        Box::pin(async move {
            if self.ctx.is_none() {
                self.open()?;
            }
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, std::result::Result<(), TransportError>> {
        Box::pin(async move {
            if self.ctx.take().is_some() {
                tracing::info!("closed serial port {}", self.config.port);
            }
            Ok(())
        })
    }

    fn execute(
        &mut self,
        unit: u8,
        request: ReadRequest,
    ) -> BoxFuture<'_, std::result::Result<Option<Vec<u16>>, TransportError>> {
        Box::pin(async move {
            if self.ctx.is_none() {
                self.open()?;
            }
            let timeout = self.config.timeout;
            let ctx = self.ctx.as_mut().ok_or(TransportError::NotConnected)?;

            let result = exchange(ctx, unit, request, timeout).await;
            if let Err(e) = &result {
                if e.poisons_connection() {
                    // Reopening discards whatever is left in the port buffers
                    tracing::warn!(
                        "reopening serial port {} after failed exchange: {}",
                        self.config.port,
                        e
                    );
                    self.ctx = None;
                }
            }
            result
        })
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(19_200)
            .timeout(Duration::from_millis(500));
        assert_eq!(config.baud_rate, 19_200);
        assert_eq!(config.timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_missing_port_fails_to_connect() {
        let mut transport = RtuTransport::with_port("/dev/meterpoll-does-not-exist");
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = list_ports();
    }
}
