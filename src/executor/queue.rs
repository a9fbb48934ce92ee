//! Work queue of pending requests.
//!
//! The service end of the queue is the front of the deque. Under LIFO order
//! new requests are pushed at the front, under FIFO at the back. Control
//! requests always go to the front so they run next.

use crate::models::Request;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Service order of caller requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    /// Most recently queued request first
    #[default]
    Lifo,
    /// Oldest queued request first
    Fifo,
}

impl fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifo => write!(f, "lifo"),
            Self::Fifo => write!(f, "fifo"),
        }
    }
}

impl FromStr for QueueOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lifo" => Ok(Self::Lifo),
            "fifo" => Ok(Self::Fifo),
            other => Err(format!("Unknown queue order '{}' (expected lifo or fifo)", other)),
        }
    }
}

/// A request together with the sequence number it was queued under.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub seq: u64,
    pub request: Request,
}

#[derive(Debug)]
pub struct WorkQueue {
    order: QueueOrder,
    entries: VecDeque<QueuedRequest>,
    next_seq: u64,
}

impl WorkQueue {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            order,
            entries: VecDeque::new(),
            next_seq: 1,
        }
    }

    /// Queue a request according to the configured order.
    pub fn push(&mut self, request: Request) -> u64 {
        let entry = self.entry(request);
        let seq = entry.seq;
        match self.order {
            QueueOrder::Lifo => self.entries.push_front(entry),
            QueueOrder::Fifo => self.entries.push_back(entry),
        }
        seq
    }

    /// Queue a request so it is served next regardless of order.
    pub fn push_priority(&mut self, request: Request) -> u64 {
        let entry = self.entry(request);
        let seq = entry.seq;
        self.entries.push_front(entry);
        seq
    }

    /// The request that would be served next.
    pub fn peek(&self) -> Option<&QueuedRequest> {
        self.entries.front()
    }

    /// Remove the request queued under `seq`, wherever it now sits.
    pub fn pop(&mut self, seq: u64) -> Option<Request> {
        let idx = self.entries.iter().position(|e| e.seq == seq)?;
        self.entries.remove(idx).map(|e| e.request)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.entries.iter().any(|e| e.seq == seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every request except the one queued under `keep`.
    pub fn drain_except(&mut self, keep: Option<u64>) -> Vec<Request> {
        let mut drained = Vec::with_capacity(self.entries.len());
        self.entries.retain(|e| {
            if Some(e.seq) == keep {
                true
            } else {
                drained.push(e.request.clone());
                false
            }
        });
        drained
    }

    fn entry(&mut self, request: Request) -> QueuedRequest {
        let seq = self.next_seq;
        self.next_seq += 1;
        QueuedRequest { seq, request }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionControl;

    fn raw(cb: &str) -> Request {
        Request::raw_query("SELECT 1", vec![], cb, TransactionControl::transient())
    }

    #[test]
    fn test_lifo_serves_newest_first() {
        let mut queue = WorkQueue::new(QueueOrder::Lifo);
        queue.push(raw("a"));
        queue.push(raw("b"));
        assert_eq!(queue.peek().unwrap().request.callback(), Some("b"));
    }

    #[test]
    fn test_fifo_serves_oldest_first() {
        let mut queue = WorkQueue::new(QueueOrder::Fifo);
        queue.push(raw("a"));
        queue.push(raw("b"));
        assert_eq!(queue.peek().unwrap().request.callback(), Some("a"));
    }

    #[test]
    fn test_priority_runs_next_under_fifo() {
        let mut queue = WorkQueue::new(QueueOrder::Fifo);
        queue.push(raw("a"));
        queue.push_priority(Request::refresh_context("db down"));
        assert!(queue.peek().unwrap().request.is_control());
    }

    #[test]
    fn test_pop_by_seq_after_newer_push() {
        let mut queue = WorkQueue::new(QueueOrder::Lifo);
        let first = queue.push(raw("a"));
        let peeked = queue.peek().unwrap().seq;
        assert_eq!(peeked, first);
        queue.push(raw("b"));
        let popped = queue.pop(first).unwrap();
        assert_eq!(popped.callback(), Some("a"));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop(first).is_none());
    }

    #[test]
    fn test_drain_keeps_in_flight() {
        let mut queue = WorkQueue::new(QueueOrder::Fifo);
        let keep = queue.push(raw("a"));
        queue.push(raw("b"));
        queue.push(raw("c"));
        let drained = queue.drain_except(Some(keep));
        assert_eq!(drained.len(), 2);
        assert!(queue.contains(keep));
        assert_eq!(queue.drain_except(None).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_order_parse() {
        assert_eq!("FIFO".parse::<QueueOrder>().unwrap(), QueueOrder::Fifo);
        assert_eq!(QueueOrder::default(), QueueOrder::Lifo);
        assert!("random".parse::<QueueOrder>().is_err());
    }
}
