//! Read coordinator in front of the transport.
//!
//! [`ReadCoordinator`] is the single entry point for register reads. It
//! answers from the [`ResponseCache`] while an entry is fresh, otherwise it
//! performs exactly one transport exchange, validates the result and only
//! then caches it. Every failure evicts the key it was reading; mix-ups evict
//! the whole unit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::{CacheKey, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, ReadError, Result, TransportError};
use crate::event::{CacheScope, Event, EventDispatcher, Subscription};
use crate::transport::Transport;
use crate::types::{ReadRequest, RegisterConfig, RegisterMap, RegisterValues, Value};

/// Default maximum age of a cached response.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(1);

/// Default pause between two exchanges on the bus.
pub const DEFAULT_INTER_REQUEST_DELAY: Duration = Duration::from_millis(50);

/// Configuration for the read coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum age of a cached response.
    pub freshness_window: Duration,
    /// Minimum pause between two exchanges.
    pub inter_request_delay: Duration,
    /// Per-unit overrides of the inter-request delay.
    pub device_delays: HashMap<u8, Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            inter_request_delay: DEFAULT_INTER_REQUEST_DELAY,
            device_delays: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the freshness window.
    #[must_use]
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Sets the default inter-request delay.
    #[must_use]
    pub fn inter_request_delay(mut self, delay: Duration) -> Self {
        self.inter_request_delay = delay;
        self
    }

    /// Sets the inter-request delay for one unit.
    #[must_use]
    pub fn device_delay(mut self, unit: u8, delay: Duration) -> Self {
        self.device_delays.insert(unit, delay);
        self
    }

    /// Returns the pause required before an exchange with `unit`.
    #[must_use]
    pub fn delay_for(&self, unit: u8) -> Duration {
        self.device_delays
            .get(&unit)
            .copied()
            .unwrap_or(self.inter_request_delay)
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.freshness_window.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "freshness window must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Diagnostic snapshot of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Number of cached responses, fresh or not.
    pub cache_entries: usize,
    /// When the last transport exchange finished.
    pub last_exchange: Option<Instant>,
    /// Whether the transport reports a live connection.
    pub connected: bool,
}

/// Sole owner of the transport and the response cache.
///
/// Takes `&mut self` for every read, so a single owner (usually the
/// [`Scheduler`](crate::scheduler::Scheduler)) never has two exchanges in
/// flight. Use [`SharedCoordinator`] when several tasks need access.
pub struct ReadCoordinator<T> {
    transport: T,
    cache: ResponseCache,
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    dispatcher: EventDispatcher,
    last_exchange: Option<Instant>,
}

impl<T: Transport> ReadCoordinator<T> {
    /// Creates a coordinator with default settings and the Tokio clock.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cache: ResponseCache::new(),
            config: CoordinatorConfig::default(),
            clock: Arc::new(SystemClock),
            dispatcher: EventDispatcher::default(),
            last_exchange: None,
        }
    }

    /// Creates a coordinator with custom configuration and clock.
    pub fn with_config(
        transport: T,
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            ..Self::new(transport)
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport mutably, e.g. to reconnect it.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Subscribes to read failures, mix-ups and cache clears.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Reads a register range from a unit.
    ///
    /// Served from the cache while the entry for the same unit, function,
    /// range and data type is younger than the freshness window.
    pub async fn read_registers(
        &mut self,
        unit: u8,
        request: &ReadRequest,
    ) -> std::result::Result<RegisterValues, ReadError> {
        let key = CacheKey::new(unit, request);
        let window = self.config.freshness_window;

        if let Some(values) = self.cache.get_fresh(&key, self.clock.now(), window) {
            tracing::debug!(
                "cache hit for unit {}, register 0x{:04X}",
                unit,
                request.register
            );
            return Ok(values);
        }

        if let Some(pause) = self.bus_pause(unit) {
            tracing::trace!("waiting {:?} for bus (unit {})", pause, unit);
            self.clock.sleep(pause).await;
        }

        tracing::debug!(
            "reading unit {}, function 0x{:02X}, register 0x{:04X}, count {}, type {}",
            unit,
            request.function.to_byte(),
            request.register,
            request.count,
            request.data_type
        );
        let outcome = self.transport.execute(unit, *request).await;
        self.last_exchange = Some(self.clock.now());

        let result = match outcome {
            Ok(Some(words)) => RegisterValues::new(words).ok_or(ReadError::EmptyResponse {
                unit,
                register: request.register,
            }),
            Ok(None) => Err(ReadError::NullResponse {
                unit,
                register: request.register,
            }),
            Err(e) => Err(ReadError::Transport(e)),
        };

        match result {
            Ok(values) => {
                self.cache.insert(key, values.clone(), self.clock.now());
                tracing::debug!(
                    "read unit {}, register 0x{:04X}: {} values",
                    unit,
                    request.register,
                    values.len()
                );
                Ok(values)
            }
            Err(e) => {
                self.handle_failure(&key, &e);
                Err(e)
            }
        }
    }

    /// Reads and decodes one register field.
    pub async fn read_value(&mut self, unit: u8, config: &RegisterConfig) -> Result<Value> {
        let values = self.read_registers(unit, &ReadRequest::from(config)).await?;
        Ok(values.decode(config)?)
    }

    /// Reads every field of a register map.
    ///
    /// A failing field is reported in place and does not stop the others.
    pub async fn read_map(&mut self, unit: u8, map: &RegisterMap) -> Vec<(String, Result<Value>)> {
        let mut results = Vec::with_capacity(map.len());
        for (name, config) in map.iter() {
            let value = self.read_value(unit, config).await;
            if let Err(e) = &value {
                tracing::warn!("failed to read {} from unit {}: {}", name, unit, e);
            }
            results.push((name.to_owned(), value));
        }
        results
    }

    /// Removes every cached response of a unit.
    pub fn clear_cache_for_device(&mut self, unit: u8) -> usize {
        let removed = self.cache.clear_device(unit);
        if removed > 0 {
            tracing::debug!("cleared {} cache entries for unit {}", removed, unit);
        } else {
            tracing::debug!("no cache entries to clear for unit {}", unit);
        }
        self.dispatcher.dispatch(Event::CacheCleared {
            scope: CacheScope::Device(unit),
            entries: removed,
        });
        removed
    }

    /// Removes every cached response.
    pub fn clear_all_cache(&mut self) -> usize {
        let removed = self.cache.clear();
        if removed > 0 {
            tracing::info!("cleared all {} cache entries", removed);
        }
        self.dispatcher.dispatch(Event::CacheCleared {
            scope: CacheScope::All,
            entries: removed,
        });
        removed
    }

    /// Resets the link after channel-wide anomalies.
    ///
    /// Clears the whole cache and drops the connection. The next exchange
    /// reconnects and still waits for the bus delay.
    pub async fn recover(&mut self) -> std::result::Result<usize, TransportError> {
        tracing::info!("starting recovery");
        let removed = self.clear_all_cache();
        self.transport.disconnect().await?;
        self.last_exchange = Some(self.clock.now());
        tracing::info!("recovery completed, {} cache entries dropped", removed);
        Ok(removed)
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.cache
            .purge_expired(self.clock.now(), self.config.freshness_window)
    }

    /// Returns a diagnostic snapshot.
    #[must_use]
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            cache_entries: self.cache.len(),
            last_exchange: self.last_exchange,
            connected: self.transport.is_connected(),
        }
    }

    /// Returns the cache, for inspection.
    #[must_use]
    pub const fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Wraps the coordinator for use by several callers.
    #[must_use]
    pub fn into_shared(self) -> SharedCoordinator<T> {
        SharedCoordinator {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    /// Returns how long to wait before the next exchange with `unit`.
    fn bus_pause(&self, unit: u8) -> Option<Duration> {
        let last = self.last_exchange?;
        let required = self.config.delay_for(unit);
        let elapsed = self.clock.now().saturating_duration_since(last);
        (elapsed < required).then(|| required - elapsed)
    }

    fn handle_failure(&mut self, key: &CacheKey, error: &ReadError) {
        if self.cache.remove(key) {
            tracing::debug!(
                "removed cache entry for unit {}, register 0x{:04X}",
                key.unit,
                key.register
            );
        }

        if error.is_mix_up() {
            tracing::warn!(
                "communication mix-up detected for unit {}, register 0x{:04X}: {}",
                key.unit,
                key.register,
                error
            );
            self.dispatcher.dispatch(Event::MixUpDetected {
                unit: key.unit,
                register: key.register,
            });
            self.clear_cache_for_device(key.unit);
        } else {
            tracing::warn!(
                "read failed for unit {}, register 0x{:04X}: {}",
                key.unit,
                key.register,
                error
            );
        }

        self.dispatcher.dispatch(Event::ReadFailed {
            unit: key.unit,
            register: key.register,
            message: error.to_string(),
        });
    }
}

/// A [`ReadCoordinator`] behind an async mutex.
///
/// Every operation holds the lock for its whole duration, including the
/// transport exchange.
pub struct SharedCoordinator<T> {
    inner: Arc<Mutex<ReadCoordinator<T>>>,
}

impl<T> Clone for SharedCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedCoordinator<T> {
    /// Reads a register range from a unit.
    pub async fn read_registers(
        &self,
        unit: u8,
        request: &ReadRequest,
    ) -> std::result::Result<RegisterValues, ReadError> {
        self.inner.lock().await.read_registers(unit, request).await
    }

    /// Reads and decodes one register field.
    pub async fn read_value(&self, unit: u8, config: &RegisterConfig) -> Result<Value> {
        self.inner.lock().await.read_value(unit, config).await
    }

    /// Reads every field of a register map under one lock.
    pub async fn read_map(&self, unit: u8, map: &RegisterMap) -> Vec<(String, Result<Value>)> {
        self.inner.lock().await.read_map(unit, map).await
    }

    /// Removes every cached response of a unit.
    pub async fn clear_cache_for_device(&self, unit: u8) -> usize {
        self.inner.lock().await.clear_cache_for_device(unit)
    }

    /// Removes every cached response.
    pub async fn clear_all_cache(&self) -> usize {
        self.inner.lock().await.clear_all_cache()
    }

    /// Clears the cache and drops the connection.
    pub async fn recover(&self) -> std::result::Result<usize, TransportError> {
        self.inner.lock().await.recover().await
    }

    /// Returns a diagnostic snapshot.
    pub async fn status(&self) -> CoordinatorStatus {
        self.inner.lock().await.status()
    }

    /// Subscribes to read failures, mix-ups and cache clears.
    pub async fn subscribe(&self) -> Subscription {
        self.inner.lock().await.subscribe()
    }
}
