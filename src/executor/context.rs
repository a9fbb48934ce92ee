//! Executor context: the work queue, the connection registry and the single
//! worker that drains them.
//!
//! All queue and registry mutation happens under one lock. The worker is a
//! tokio task fed by a pump channel; every queued request, every pop and
//! every availability notice sends one pump, and each pump runs one
//! [`Processor`](crate::executor::processor::Processor) pass.

use crate::error::{BrokerError, BrokerResult};
use crate::executor::cache::ColumnCache;
use crate::executor::metadata::QueryMetadataExtender;
use crate::executor::processor::Processor;
use crate::executor::queue::{QueueOrder, QueuedRequest, WorkQueue};
use crate::executor::registry::{ConnectionMetadata, ConnectionRegistry};
use crate::db::DatabaseService;
use crate::host::{HandleOf, HostSurface};
use crate::models::{OrderedColumns, Request, ResponseData, ResponseEnvelope, ResponseMetadata};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct ContextState<Hd> {
    queue: WorkQueue,
    registry: ConnectionRegistry<Hd>,
    /// Request a processor pass has claimed and not yet popped
    in_flight: Option<u64>,
    pump: Option<mpsc::UnboundedSender<()>>,
    /// Set once by `release_resources`
    released: Option<String>,
}

impl<Hd> ContextState<Hd> {
    fn pump(&self) {
        if let Some(pump) = &self.pump {
            // Receiver only goes away with the worker, after release.
            let _ = pump.send(());
        }
    }
}

pub struct ExecutorContext<H: HostSurface> {
    host: Arc<H>,
    generation: u64,
    state: Mutex<ContextState<HandleOf<H>>>,
    columns: ColumnCache,
    extender: Arc<dyn QueryMetadataExtender>,
    /// Context this one replaced, released by the queued refresh request
    superseded: Mutex<Option<Arc<ExecutorContext<H>>>>,
}

impl<H: HostSurface> ExecutorContext<H> {
    /// Create a context and start its worker.
    ///
    /// When `superseded` is given, a refresh request is queued ahead of all
    /// other work to release the replaced context.
    pub fn spawn(
        host: Arc<H>,
        generation: u64,
        order: QueueOrder,
        extender: Arc<dyn QueryMetadataExtender>,
        superseded: Option<(Arc<ExecutorContext<H>>, String)>,
    ) -> Arc<Self> {
        let (pump_tx, pump_rx) = mpsc::unbounded_channel();
        let context = Arc::new(Self {
            host,
            generation,
            state: Mutex::new(ContextState {
                queue: WorkQueue::new(order),
                registry: ConnectionRegistry::new(),
                in_flight: None,
                pump: Some(pump_tx),
                released: None,
            }),
            columns: ColumnCache::new(),
            extender,
            superseded: Mutex::new(None),
        });

        tokio::spawn(run_worker(Arc::downgrade(&context), pump_rx));
        info!(generation, order = %order, "Executor context started");

        if let Some((previous, reason)) = superseded {
            debug!(
                generation,
                superseded = previous.generation(),
                "Scheduling release of superseded context"
            );
            *context.superseded.lock() = Some(previous);
            context.queue_request(Request::refresh_context(reason));
        }
        context
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn app_name(&self) -> &str {
        self.host.app_name()
    }

    pub fn extender(&self) -> &dyn QueryMetadataExtender {
        self.extender.as_ref()
    }

    /// Queue a request and schedule a processor pass.
    ///
    /// A released context accepts nothing; the request is failed at once
    /// with the shutdown message.
    pub fn queue_request(&self, request: Request) {
        let rejected = {
            let mut state = self.state.lock();
            match &state.released {
                Some(reason) => Some((request, reason.clone())),
                None => {
                    debug!(generation = self.generation, kind = %request.kind(), "Request queued");
                    if request.is_control() {
                        state.queue.push_priority(request);
                    } else {
                        state.queue.push(request);
                    }
                    state.pump();
                    None
                }
            }
        };

        if let Some((request, reason)) = rejected {
            if let Some(callback) = request.callback() {
                warn!(
                    generation = self.generation,
                    kind = %request.kind(),
                    "Request rejected by released context"
                );
                self.report_error(
                    callback,
                    None,
                    BrokerError::shutting_down(reason).to_string(),
                );
            }
        }
    }

    /// The request the next processor pass would run.
    pub fn peek_request(&self) -> Option<QueuedRequest> {
        self.state.lock().queue.peek().cloned()
    }

    /// Mark a peeked request as being processed. Fails if the request is
    /// gone or the context was released in the meantime.
    pub(crate) fn claim_request(&self, seq: u64) -> bool {
        let mut state = self.state.lock();
        if state.released.is_some() || !state.queue.contains(seq) {
            return false;
        }
        state.in_flight = Some(seq);
        true
    }

    /// Remove a handled request and schedule the next pass.
    pub fn pop_request(&self, seq: u64) -> Option<Request> {
        let mut state = self.state.lock();
        if state.in_flight == Some(seq) {
            state.in_flight = None;
        }
        let popped = state.queue.pop(seq);
        if popped.is_some() && !state.queue.is_empty() {
            state.pump();
        }
        popped
    }

    pub fn report_error(
        &self,
        callback: &str,
        trans_id: Option<String>,
        message: impl Into<String>,
    ) {
        self.host
            .signal_response_available(ResponseEnvelope::failure(callback, trans_id, message));
    }

    pub fn report_success(
        &self,
        callback: &str,
        trans_id: Option<String>,
        data: Option<ResponseData>,
        metadata: Option<ResponseMetadata>,
    ) {
        self.host.signal_response_available(ResponseEnvelope::success(
            callback, trans_id, data, metadata,
        ));
    }

    /// Deliver a processed request's envelope.
    ///
    /// An envelope naming a transaction goes out only while that transaction
    /// is registered, checked under the state lock so a concurrent release
    /// cannot interleave. Otherwise the request fails with the release message.
    pub(crate) fn report_outcome(&self, envelope: ResponseEnvelope) {
        let Some(trans_id) = envelope.trans_id() else {
            self.host.signal_response_available(envelope);
            return;
        };

        let state = self.state.lock();
        if state.registry.contains(trans_id) {
            self.host.signal_response_available(envelope);
            return;
        }
        let reason = state
            .released
            .clone()
            .unwrap_or_else(|| "connection released".to_string());
        drop(state);

        warn!(
            generation = self.generation,
            transaction_id = %trans_id,
            reason = %reason,
            "Transaction released while its request was running"
        );
        self.report_error(
            envelope.callback(),
            None,
            BrokerError::shutting_down(reason).to_string(),
        );
    }

    /// Why this context was released, if it was.
    pub fn released_reason(&self) -> Option<String> {
        self.state.lock().released.clone()
    }

    pub fn register_active_connection(
        &self,
        transaction_id: &str,
        handle: HandleOf<H>,
    ) -> BrokerResult<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.released {
            return Err(BrokerError::shutting_down(reason.clone()));
        }
        state.registry.register(transaction_id, handle)
    }

    pub fn get_active_connection(&self, transaction_id: &str) -> Option<HandleOf<H>> {
        self.state.lock().registry.get(transaction_id)
    }

    pub fn remove_active_connection(&self, transaction_id: &str) -> Option<HandleOf<H>> {
        self.state.lock().registry.remove(transaction_id)
    }

    pub fn active_connections(&self) -> Vec<ConnectionMetadata> {
        self.state.lock().registry.list_all()
    }

    pub fn ordered_columns(&self, table_id: &str) -> Option<Arc<OrderedColumns>> {
        self.columns.get(table_id)
    }

    pub fn put_ordered_columns(&self, columns: OrderedColumns) -> Arc<OrderedColumns> {
        self.columns.insert(columns)
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released.is_some()
    }

    /// Resume pumping after the database service came back.
    pub fn database_available(&self) {
        let state = self.state.lock();
        debug!(
            generation = self.generation,
            pending = state.queue.len(),
            "Database available, resuming"
        );
        state.pump();
    }

    pub(crate) fn take_superseded(&self) -> Option<Arc<ExecutorContext<H>>> {
        self.superseded.lock().take()
    }

    /// Stop accepting work, fail every pending request and roll back every
    /// open connection. Contexts this one superseded are released too.
    pub async fn release_resources(&self, reason: &str) {
        let mut chain = Vec::new();
        let mut next = self.take_superseded();
        while let Some(previous) = next {
            next = previous.take_superseded();
            chain.push(previous);
        }

        self.release_own(reason).await;
        for previous in chain {
            previous.release_own(reason).await;
        }
    }

    async fn release_own(&self, reason: &str) {
        let (pending, connections) = {
            let mut state = self.state.lock();
            if state.released.is_some() {
                return;
            }
            state.released = Some(reason.to_string());
            state.pump = None;
            let keep = state.in_flight;
            (state.queue.drain_except(keep), state.registry.drain())
        };

        warn!(
            generation = self.generation,
            reason = %reason,
            pending = pending.len(),
            connections = connections.len(),
            "Releasing executor context"
        );

        let message = BrokerError::shutting_down(reason).to_string();
        for request in &pending {
            if let Some(callback) = request.callback() {
                self.report_error(callback, None, message.clone());
            }
        }

        if connections.is_empty() {
            return;
        }
        let Some(service) = self.host.database() else {
            warn!(
                generation = self.generation,
                connections = connections.len(),
                "Database service gone, dropping connections without rollback"
            );
            return;
        };
        for (transaction_id, handle) in connections {
            match service
                .close_transaction(self.app_name(), &handle, false)
                .await
            {
                Ok(()) => debug!(transaction_id = %transaction_id, "Rolled back on release"),
                Err(e) => warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Rollback on release failed"
                ),
            }
        }
    }
}

async fn run_worker<H: HostSurface>(
    context: Weak<ExecutorContext<H>>,
    mut pumps: mpsc::UnboundedReceiver<()>,
) {
    while pumps.recv().await.is_some() {
        let Some(context) = context.upgrade() else {
            break;
        };
        Processor::new(context).run().await;
    }
    debug!("Executor worker stopped");
}
