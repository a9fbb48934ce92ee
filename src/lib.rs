//! Table Broker Library
//!
//! This library queues UI requests against a local table store, runs them one
//! at a time on a single worker, and manages transactions that span several
//! requests. Results come back as JSON response envelopes keyed by the
//! caller's callback token.

pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod host;
pub mod models;
pub mod transport;

pub use config::{BrokerSettings, Config};
pub use error::{BrokerError, BrokerResult};
pub use executor::{Broker, ExecutorContext, QueueOrder};
pub use host::{HostSurface, LocalHost};
