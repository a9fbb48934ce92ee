//! Delivery of response envelopes to waiting callers.
//!
//! A caller that wants its answer directly registers its callback token with
//! [`ResponseRouter::expect`] before submitting. Envelopes nobody waits for go
//! to the outbound channel when one is attached, otherwise they are buffered
//! for [`ResponseRouter::poll`]. The buffer keeps at most
//! [`MAX_UNCLAIMED`] envelopes; older ones are dropped first.

use crate::error::{BrokerError, BrokerResult};
use crate::models::ResponseEnvelope;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Capacity of the unclaimed-envelope buffer.
pub const MAX_UNCLAIMED: usize = 1024;

#[derive(Default)]
struct RouterState {
    waiters: HashMap<String, oneshot::Sender<ResponseEnvelope>>,
    unclaimed: VecDeque<ResponseEnvelope>,
}

impl RouterState {
    fn buffer(&mut self, envelope: ResponseEnvelope) {
        if self.unclaimed.len() >= MAX_UNCLAIMED {
            if let Some(dropped) = self.unclaimed.pop_front() {
                warn!(
                    callback = %dropped.callback(),
                    capacity = MAX_UNCLAIMED,
                    "Unclaimed buffer full, dropping oldest envelope"
                );
            }
        }
        self.unclaimed.push_back(envelope);
    }
}

#[derive(Default)]
pub struct ResponseRouter {
    state: Mutex<RouterState>,
    outbound: Option<mpsc::UnboundedSender<ResponseEnvelope>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router that forwards unclaimed envelopes to `outbound`.
    pub fn with_outbound(outbound: mpsc::UnboundedSender<ResponseEnvelope>) -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
            outbound: Some(outbound),
        }
    }

    /// Wait for the envelope carrying `token`.
    pub fn expect(&self, token: &str) -> BrokerResult<oneshot::Receiver<ResponseEnvelope>> {
        let mut state = self.state.lock();
        if state.waiters.contains_key(token) {
            return Err(BrokerError::invalid_input(format!(
                "callback token '{}' is already awaited",
                token
            )));
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(token.to_string(), tx);
        Ok(rx)
    }

    /// Route one envelope.
    pub fn deliver(&self, envelope: ResponseEnvelope) {
        let waiter = self.state.lock().waiters.remove(envelope.callback());
        let envelope = match waiter {
            Some(tx) => match tx.send(envelope) {
                Ok(()) => return,
                // Waiter went away; treat as unclaimed.
                Err(envelope) => envelope,
            },
            None => envelope,
        };

        if let Some(outbound) = &self.outbound {
            match outbound.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => {
                    warn!(
                        callback = %envelope.callback(),
                        "Outbound channel closed, buffering envelope"
                    );
                    self.state.lock().buffer(envelope);
                }
            }
        } else {
            debug!(callback = %envelope.callback(), "Buffering unclaimed envelope");
            self.state.lock().buffer(envelope);
        }
    }

    /// Oldest unclaimed envelope, if any.
    pub fn poll(&self) -> Option<ResponseEnvelope> {
        self.state.lock().unclaimed.pop_front()
    }

    pub fn take_unclaimed(&self) -> Vec<ResponseEnvelope> {
        self.state.lock().unclaimed.drain(..).collect()
    }
}
