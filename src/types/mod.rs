//! Data types shared by the transport, the cache and callers.
//!
//! - Read requests and function codes
//! - Validated register payloads and their decoding
//! - Register maps describing one meter model

pub mod register;
pub mod register_map;
pub mod request;

pub use register::{DataType, RegisterConfig, RegisterValues, Value, WordOrder};
pub use register_map::RegisterMap;
pub use request::{FunctionCode, ReadRequest};
