//! Modbus TCP transport.

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_modbus::client::{Context, tcp};

use crate::error::TransportError;
use crate::transport::{DEFAULT_TIMEOUT, Transport, exchange};
use crate::types::ReadRequest;

/// Default Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// Configuration for TCP transport.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Gateway address.
    pub addr: SocketAddr,
    /// Timeout of one exchange.
    pub timeout: Duration,
    /// Timeout of the TCP connect.
    pub connect_timeout: Duration,
}

impl TcpConfig {
    /// Creates a new TCP configuration with default timeouts.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the exchange timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Modbus TCP transport to one gateway.
///
/// The connection is opened lazily and dropped after any error that leaves
/// the stream in an unknown state, so a late response can never be read as
/// the answer to the next request.
pub struct TcpTransport {
    config: TcpConfig,
    ctx: Option<Context>,
}

impl TcpTransport {
    /// Creates a new TCP transport with the given configuration.
    #[must_use]
    pub const fn new(config: TcpConfig) -> Self {
        Self { config, ctx: None }
    }

    /// Creates a new TCP transport for the given address with default settings.
    #[must_use]
    pub const fn with_addr(addr: SocketAddr) -> Self {
        Self::new(TcpConfig::new(addr))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TcpConfig {
        &self.config
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        tracing::info!("connecting to modbus gateway {}", self.config.addr);

        let connect = tcp::connect(self.config.addr);
        let ctx = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: u64::try_from(self.config.connect_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            })??;

        self.ctx = Some(ctx);
        tracing::info!("connected to modbus gateway {}", self.config.addr);
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.ctx.is_some() {
                return Ok(());
            }
            self.open().await
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.ctx.take().is_some() {
                tracing::info!("disconnected from modbus gateway {}", self.config.addr);
            }
            Ok(())
        })
    }

    fn execute(
        &mut self,
        unit: u8,
        request: ReadRequest,
    ) -> BoxFuture<'_, Result<Option<Vec<u16>>, TransportError>> {
        Box::pin(async move {
            if self.ctx.is_none() {
                self.open().await?;
            }
            let timeout = self.config.timeout;
            let ctx = self.ctx.as_mut().ok_or(TransportError::NotConnected)?;

            let result = exchange(ctx, unit, request, timeout).await;
            if let Err(e) = &result {
                if e.poisons_connection() {
                    tracing::warn!(
                        "dropping connection to {} after failed exchange: {}",
                        self.config.addr,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([172, 16, 0, 60], DEFAULT_PORT))
    }

    #[test]
    fn test_tcp_config_defaults() {
        let config = TcpConfig::new(addr());
        assert_eq!(config.addr.port(), 502);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_tcp_config_builder() {
        let config = TcpConfig::new(addr())
            .timeout(Duration::from_secs(2))
            .connect_timeout(Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_starts_disconnected() {
        let transport = TcpTransport::with_addr(addr());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        // Bind and drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let free = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = TcpTransport::new(
            TcpConfig::new(free).connect_timeout(Duration::from_secs(1)),
        );
        let err = transport
            .execute(1, ReadRequest::holding(0, 1, crate::types::DataType::UInt16))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_) | TransportError::Timeout { .. }));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_broadcast_unit_is_rejected_without_dropping_connection() {
        // The listener backlog completes the handshake without an accept
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();

        let mut transport = TcpTransport::with_addr(local);
        transport.connect().await.unwrap();
        let err = transport
            .execute(0, ReadRequest::holding(0, 1, crate::types::DataType::UInt16))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::InvalidUnit { unit: 0 }));
        assert!(transport.is_connected());
    }
}
