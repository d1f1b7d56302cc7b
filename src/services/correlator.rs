use std::collections::{HashMap, HashSet, VecDeque};
use tokio::time::{Duration, Instant};

use crate::flow::message::FlowMessage;
use crate::modbus::protocol::CorrelationId;
use crate::utils::error::WriteError;

/// Caller context parked while its write is in flight.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub message: FlowMessage,
    pub issued_at: Instant,
}

/// How many expired ids are remembered for late completions.
const EXPIRED_HISTORY: usize = 1024;

/// Table of in-flight writes, keyed by correlation id.
///
/// Owned by a single endpoint; never shared. Ids removed by [`expire`] are
/// remembered (up to `EXPIRED_HISTORY`) so a late completion for them can
/// be told apart from one that was never issued here.
///
/// [`expire`]: RequestCorrelator::expire
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    entries: HashMap<CorrelationId, PendingWrite>,
    expired: HashSet<CorrelationId>,
    expired_order: VecDeque<CorrelationId>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, id: CorrelationId, message: FlowMessage) -> Result<(), WriteError> {
        if self.entries.contains_key(&id) {
            return Err(WriteError::DuplicateCorrelationId(id));
        }
        self.entries.insert(
            id,
            PendingWrite {
                message,
                issued_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Removes and returns the entry; `None` for unknown or already resolved ids.
    pub fn take(&mut self, id: &CorrelationId) -> Option<FlowMessage> {
        self.entries.remove(id).map(|pending| pending.message)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.expired.clear();
        self.expired_order.clear();
    }

    /// True once for an id that timed out; the record is dropped on lookup.
    pub fn forget_expired(&mut self, id: &CorrelationId) -> bool {
        if !self.expired.remove(id) {
            return false;
        }
        self.expired_order.retain(|known| known != id);
        true
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry issued at least `ttl` before `now`.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<(CorrelationId, FlowMessage)> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.issued_at) >= ttl)
            .map(|(id, _)| *id)
            .collect();

        let expired: Vec<(CorrelationId, FlowMessage)> = expired
            .into_iter()
            .filter_map(|id| self.take(&id).map(|message| (id, message)))
            .collect();

        for (id, _) in &expired {
            self.remember_expired(*id);
        }
        expired
    }

    fn remember_expired(&mut self, id: CorrelationId) {
        if !self.expired.insert(id) {
            return;
        }
        self.expired_order.push_back(id);
        while self.expired_order.len() > EXPIRED_HISTORY {
            if let Some(oldest) = self.expired_order.pop_front() {
                self.expired.remove(&oldest);
            }
        }
    }
}
