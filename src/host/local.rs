//! In-process host with a bindable database service.

use crate::db::DatabaseService;
use crate::host::{HostSurface, ResponseRouter};
use crate::models::ResponseEnvelope;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct LocalHost<S> {
    app_name: String,
    service: RwLock<Option<Arc<S>>>,
    availability: watch::Sender<bool>,
    router: ResponseRouter,
}

impl<S: DatabaseService> LocalHost<S> {
    /// Host with no service bound yet.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self::with_router(app_name, ResponseRouter::new())
    }

    /// Host forwarding unclaimed envelopes to `outbound`.
    pub fn with_outbound(
        app_name: impl Into<String>,
        outbound: mpsc::UnboundedSender<ResponseEnvelope>,
    ) -> Self {
        Self::with_router(app_name, ResponseRouter::with_outbound(outbound))
    }

    fn with_router(app_name: impl Into<String>, router: ResponseRouter) -> Self {
        let (availability, _) = watch::channel(false);
        Self {
            app_name: app_name.into(),
            service: RwLock::new(None),
            availability,
            router,
        }
    }

    /// Bind a service and announce availability.
    pub fn bind(&self, service: Arc<S>) {
        *self.service.write() = Some(service);
        self.availability.send_replace(true);
        info!(app_name = %self.app_name, "Database service bound");
    }

    /// Unbind the service and announce the loss.
    pub fn unbind(&self) -> Option<Arc<S>> {
        let previous = self.service.write().take();
        self.availability.send_replace(false);
        info!(app_name = %self.app_name, "Database service unbound");
        previous
    }

    pub fn router(&self) -> &ResponseRouter {
        &self.router
    }
}

impl<S: DatabaseService> HostSurface for LocalHost<S> {
    type Service = S;

    fn database(&self) -> Option<Arc<S>> {
        self.service.read().clone()
    }

    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn signal_response_available(&self, envelope: ResponseEnvelope) {
        self.router.deliver(envelope);
    }

    fn availability(&self) -> watch::Receiver<bool> {
        self.availability.subscribe()
    }
}
