//! Connection registry for transactions that span several requests.
//!
//! Every connection opened by the processor is registered under a freshly
//! minted transaction id until it is committed or rolled back. The registry
//! itself is not locked; the owning context guards it together with the work
//! queue.

use crate::error::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

struct ActiveConnection<H> {
    handle: H,
    created_at: Instant,
    started_at: DateTime<Utc>,
}

/// Metadata about a registered connection (for listing without handing out handles).
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique transaction identifier
    pub transaction_id: String,
    /// When the connection was registered
    pub started_at: DateTime<Utc>,
    /// Seconds since registration
    pub duration_secs: u64,
}

pub struct ConnectionRegistry<H> {
    connections: HashMap<String, ActiveConnection<H>>,
}

impl<H: Clone> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Register a handle under `transaction_id`.
    ///
    /// A transaction id is registered at most once; a second registration is
    /// an illegal state.
    pub fn register(&mut self, transaction_id: &str, handle: H) -> BrokerResult<()> {
        if self.connections.contains_key(transaction_id) {
            return Err(BrokerError::illegal_state(format!(
                "transaction {} is already registered",
                transaction_id
            )));
        }
        self.connections.insert(
            transaction_id.to_string(),
            ActiveConnection {
                handle,
                created_at: Instant::now(),
                started_at: Utc::now(),
            },
        );
        info!(transaction_id = %transaction_id, "Connection registered");
        Ok(())
    }

    pub fn get(&self, transaction_id: &str) -> Option<H> {
        self.connections
            .get(transaction_id)
            .map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.connections.contains_key(transaction_id)
    }

    /// Remove a registration. The caller becomes responsible for closing the handle.
    pub fn remove(&mut self, transaction_id: &str) -> Option<H> {
        let entry = self.connections.remove(transaction_id)?;
        debug!(
            transaction_id = %transaction_id,
            held_ms = entry.created_at.elapsed().as_millis() as u64,
            "Connection unregistered"
        );
        Some(entry.handle)
    }

    /// Remove every registration, for teardown.
    pub fn drain(&mut self) -> Vec<(String, H)> {
        self.connections
            .drain()
            .map(|(id, entry)| (id, entry.handle))
            .collect()
    }

    /// List all registered connections with their metadata.
    pub fn list_all(&self) -> Vec<ConnectionMetadata> {
        self.connections
            .iter()
            .map(|(id, entry)| ConnectionMetadata {
                transaction_id: id.clone(),
                started_at: entry.started_at,
                duration_secs: entry.created_at.elapsed().as_secs(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<H: Clone> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a unique transaction ID.
pub fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
        assert_ne!(id, generate_transaction_id());
    }

    #[test]
    fn test_registry_creation() {
        let registry: ConnectionRegistry<u32> = ConnectionRegistry::new();
        assert_eq!(registry.len(), 0);
        assert!(registry.list_all().is_empty());
    }

    #[test]
    fn test_double_register_is_illegal() {
        let mut registry = ConnectionRegistry::new();
        registry.register("tx_a", 1u32).unwrap();
        let err = registry.register("tx_a", 2u32).unwrap_err();
        assert!(matches!(err, BrokerError::IllegalState { .. }));
        assert_eq!(registry.get("tx_a"), Some(1));
    }

    #[test]
    fn test_remove_and_not_found() {
        let mut registry = ConnectionRegistry::new();
        registry.register("tx_a", 7u32).unwrap();
        assert_eq!(registry.remove("tx_a"), Some(7));
        assert_eq!(registry.remove("tx_a"), None);
        assert_eq!(registry.get("tx_nonexistent"), None);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.register("tx_a", 1u32).unwrap();
        registry.register("tx_b", 2u32).unwrap();
        let metadata = registry.list_all();
        assert_eq!(metadata.len(), 2);
        let mut drained = registry.drain();
        drained.sort();
        assert_eq!(drained, vec![("tx_a".to_string(), 1), ("tx_b".to_string(), 2)]);
        assert!(registry.is_empty());
    }
}
