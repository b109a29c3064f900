// ============================
// crates/backend-lib/src/negotiation.rs
// ============================
//! Per-pair negotiation gating.
//!
//! ICE candidates may not be delivered to a peer that has not yet seen an
//! offer or answer from the sender, so each ordered sender->target pair has
//! a gate: closed until the first offer/answer between the pair is relayed,
//! with early candidates held in a bounded buffer (oldest dropped on
//! overflow). Gates are discarded when either side leaves or reconnects,
//! forcing a fresh handshake before any held-back traffic flows again.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use teleconsult_common::UserId;

#[derive(Debug, Default)]
struct PairState {
    open: bool,
    pending: VecDeque<Value>,
}

#[derive(Debug)]
pub struct NegotiationGate {
    capacity: usize,
    pairs: HashMap<(UserId, UserId), PairState>,
}

impl NegotiationGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pairs: HashMap::new(),
        }
    }

    /// Whether candidates from `from` may flow directly to `to`.
    pub fn is_open(&self, from: &str, to: &str) -> bool {
        self.pairs
            .get(&(from.to_string(), to.to_string()))
            .is_some_and(|p| p.open)
    }

    /// Mark the pair negotiated after an offer or answer from `from` was
    /// relayed to `to`. Returns any candidates buffered in the meantime,
    /// in arrival order; the caller must deliver them after the SDP frame.
    pub fn open_pair(&mut self, from: &str, to: &str) -> Vec<Value> {
        let state = self
            .pairs
            .entry((from.to_string(), to.to_string()))
            .or_default();
        state.open = true;
        state.pending.drain(..).collect()
    }

    /// Hold back a candidate that arrived before the pair's handshake.
    /// Returns the payload that was evicted if the buffer overflowed.
    pub fn buffer(&mut self, from: &str, to: &str, payload: Value) -> Option<Value> {
        let state = self
            .pairs
            .entry((from.to_string(), to.to_string()))
            .or_default();

        let evicted = if state.pending.len() >= self.capacity {
            state.pending.pop_front()
        } else {
            None
        };
        state.pending.push_back(payload);
        evicted
    }

    /// Drop every gate and buffer involving `user`, in both directions.
    pub fn forget_user(&mut self, user: &str) {
        self.pairs.retain(|(from, to), _| from != user && to != user);
    }

    pub fn pending(&self, from: &str, to: &str) -> usize {
        self.pairs
            .get(&(from.to_string(), to.to_string()))
            .map_or(0, |p| p.pending.len())
    }
}
