//! Request executor.
//!
//! This module contains the broker core:
//! - Work queue with configurable service order
//! - Connection registry keyed by transaction id
//! - Column-definition cache
//! - Executor context (monitor plus single worker)
//! - Processor state machine
//! - Broker owning the current context

pub mod broker;
pub mod cache;
pub mod context;
pub mod metadata;
pub mod payload;
pub mod processor;
pub mod queue;
pub mod registry;

pub use broker::Broker;
pub use cache::ColumnCache;
pub use context::ExecutorContext;
pub use metadata::{NoExtension, QueryMetadataExtender, query_metadata};
pub use payload::decode_mutation_payload;
pub use processor::{COMMIT_FAILED, OPEN_FAILED, TRANSACTION_ID_INVALID};
pub use queue::{QueueOrder, QueuedRequest, WorkQueue};
pub use registry::{ConnectionMetadata, ConnectionRegistry, generate_transaction_id};
