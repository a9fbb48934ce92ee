//! Owner of the current executor context.
//!
//! Exactly one context is current at a time. Losing the database service
//! replaces it with a fresh context whose first request releases the old one:
//! pending work is failed with the shutdown message and open transactions are
//! rolled back. Nothing migrates between contexts.

use crate::config::BrokerSettings;
use crate::executor::context::ExecutorContext;
use crate::executor::metadata::{NoExtension, QueryMetadataExtender};
use crate::host::HostSurface;
use crate::models::Request;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct Broker<H: HostSurface> {
    host: Arc<H>,
    settings: BrokerSettings,
    extender: Arc<dyn QueryMetadataExtender>,
    current: RwLock<Arc<ExecutorContext<H>>>,
    generation: AtomicU64,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<H: HostSurface> Broker<H> {
    /// Start a broker with its first context. Must be called inside a tokio runtime.
    pub fn start(host: Arc<H>, settings: BrokerSettings) -> Arc<Self> {
        Self::with_extender(host, settings, Arc::new(NoExtension))
    }

    /// Start a broker whose query results pass through `extender`.
    pub fn with_extender(
        host: Arc<H>,
        settings: BrokerSettings,
        extender: Arc<dyn QueryMetadataExtender>,
    ) -> Arc<Self> {
        let first = ExecutorContext::spawn(
            host.clone(),
            1,
            settings.queue_order,
            extender.clone(),
            None,
        );
        info!(
            app_name = %host.app_name(),
            queue_order = %settings.queue_order,
            "Broker started"
        );
        Arc::new(Self {
            host,
            settings,
            extender,
            current: RwLock::new(first),
            generation: AtomicU64::new(1),
            watcher: Mutex::new(None),
        })
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// The context currently accepting requests.
    pub fn current(&self) -> Arc<ExecutorContext<H>> {
        self.current.read().clone()
    }

    /// Queue a request on the current context.
    pub fn submit(&self, request: Request) {
        self.current().queue_request(request);
    }

    pub fn database_available(&self) {
        self.current().database_available();
    }

    pub fn database_unavailable(&self) {
        self.replace_context("database service disconnected");
    }

    /// Make a fresh context current and schedule the release of the old one.
    pub fn replace_context(&self, reason: &str) -> Arc<ExecutorContext<H>> {
        let mut current = self.current.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let next = ExecutorContext::spawn(
            self.host.clone(),
            generation,
            self.settings.queue_order,
            self.extender.clone(),
            Some((current.clone(), reason.to_string())),
        );
        info!(
            generation,
            superseded = current.generation(),
            reason = %reason,
            "Executor context replaced"
        );
        *current = next.clone();
        next
    }

    /// Follow the host's availability channel until the broker is dropped or
    /// shut down.
    pub fn watch_availability(self: &Arc<Self>) {
        let mut availability = self.host.availability();
        let broker = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while availability.changed().await.is_ok() {
                let available = *availability.borrow_and_update();
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                if available {
                    broker.database_available();
                } else {
                    broker.database_unavailable();
                }
            }
            debug!("Availability watcher stopped");
        });
        if let Some(previous) = self.watcher.lock().replace(task) {
            previous.abort();
        }
    }

    /// Release the current context (and anything it superseded).
    pub async fn shutdown(&self, reason: &str) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        let current = self.current();
        current.release_resources(reason).await;
        info!(generation = current.generation(), "Broker shut down");
    }
}
