//! Transport layer for the table broker.
//!
//! Transports feed bridge calls into a broker and carry the resulting
//! envelopes back to the caller. Only a JSON-lines stdio transport exists.

pub mod stdio;

pub use stdio::{StdioTransport, serve_lines, write_pending};

use crate::error::BrokerResult;
use std::future::Future;

/// Trait for broker transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling calls.
    ///
    /// This method should block until the transport is shut down.
    fn run(&self) -> impl Future<Output = BrokerResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
