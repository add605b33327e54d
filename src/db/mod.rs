//! Database layer.
//!
//! - `pool`: driver pools per backend
//! - `connection`: pooled or transaction-pinned execution with last-statement tracking
//! - `registry`: named configs, lazy connection cache and replica routing
//! - `executor`, `params`, `types`: binding values and decoding rows

pub mod connection;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod registry;
pub mod types;

pub use connection::{Connection, ConnectionOptions};
pub use pool::DbPool;
pub use registry::{Registry, RegistryOptions, replica_key};
