//! # meterpoll
//!
//! Polling core for Modbus electricity meters sharing one link.
//!
//! This library schedules periodic register reads and funnels them through a
//! single coordinator that owns the transport and a short-lived response cache.
//!
//! ## Features
//!
//! - Sequential scheduler: one task at a time, in registration order
//! - Response cache that only ever holds validated, fresh values
//! - Mix-up detection that drops every cached value of the affected unit
//! - Modbus TCP and RTU transports built on `tokio-modbus`
//! - Injectable clock for deterministic tests
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use meterpoll::{
//!     DataType, ReadCoordinator, ReadRequest, Scheduler, TaskResult, TcpTransport,
//! };
//!
//! const VOLTAGE_L1: ReadRequest = ReadRequest::holding(3027, 2, DataType::Float32);
//!
//! async fn poll(coordinator: &mut ReadCoordinator<TcpTransport>, unit: u8) -> TaskResult {
//!     let values = coordinator.read_registers(unit, &VOLTAGE_L1).await?;
//!     println!("unit {unit}: {:?}", &*values);
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meterpoll::Error> {
//!     let transport = TcpTransport::with_addr("172.16.0.60:502".parse().unwrap());
//!     let mut scheduler = Scheduler::new(ReadCoordinator::new(transport));
//!
//!     scheduler.register("meter-20", Duration::from_secs(5), |c| Box::pin(poll(c, 20)))?;
//!     scheduler.register("meter-30", Duration::from_secs(5), |c| Box::pin(poll(c, 30)))?;
//!
//!     scheduler.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scheduler`] - Sequential periodic task runner
//! - [`coordinator`] - Cached, validated register reads
//! - [`cache`] - Response cache keyed by unit and register range
//! - [`transport`] - Modbus TCP and RTU transports
//! - [`types`] - Requests, register values and decoding
//! - [`event`] - Async event system for failures, mix-ups and cache clears
//! - [`clock`] - Time sources

pub mod cache;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use cache::{CacheKey, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CoordinatorConfig, CoordinatorStatus, ReadCoordinator, SharedCoordinator};
pub use error::{DecodeError, Error, ReadError, Result, TaskError, TransportError};
pub use event::{CacheScope, Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerHandle, TaskResult, TaskStatus, TickSummary,
};
pub use transport::{
    RtuTransport, SerialConfig, TcpConfig, TcpTransport, Transport, rtu::list_ports,
};
pub use types::{
    DataType, FunctionCode, ReadRequest, RegisterConfig, RegisterMap, RegisterValues, Value,
    WordOrder,
};
