//! # Job
//!
//! Bookkeeping for one in-flight compression request on the coordinator:
//! which worker was given which strip, and which results have come back.
//! Results may arrive in any order; the job is complete exactly when every
//! assigned index has a result.

use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::pool::WorkerId;
use crate::common::messages::Envelope;

/// Outcome of offering a reply to a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Stored,
    /// A result for this index is already held
    Duplicate,
    /// The index was never assigned, or not to this worker
    Unexpected,
}

#[derive(Debug)]
pub struct Job {
    id: Uuid,
    assignments: HashMap<u32, WorkerId>,
    results: BTreeMap<u32, Envelope>,
}

impl Job {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            assignments: HashMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record that strip `index` was sent to `worker`.
    pub fn assign(&mut self, index: u32, worker: WorkerId) {
        self.assignments.insert(index, worker);
    }

    pub fn expected_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn received_count(&self) -> usize {
        self.results.len()
    }

    /// Offer a reply from `worker`.
    pub fn accept(&mut self, worker: WorkerId, envelope: Envelope) -> Accepted {
        if self.assignments.get(&envelope.index) != Some(&worker) {
            return Accepted::Unexpected;
        }
        if self.results.contains_key(&envelope.index) {
            return Accepted::Duplicate;
        }
        self.results.insert(envelope.index, envelope);
        Accepted::Stored
    }

    pub fn is_complete(&self) -> bool {
        !self.assignments.is_empty() && self.results.len() == self.assignments.len()
    }

    /// Workers whose strip has not come back yet.
    pub fn outstanding_workers(&self) -> Vec<WorkerId> {
        let mut workers: Vec<WorkerId> = self
            .assignments
            .iter()
            .filter(|(index, _)| !self.results.contains_key(index))
            .map(|(_, worker)| *worker)
            .collect();
        workers.sort_unstable();
        workers
    }

    /// Whether `worker` still owes this job a strip.
    pub fn awaits(&self, worker: WorkerId) -> bool {
        self.assignments
            .iter()
            .any(|(index, assigned)| *assigned == worker && !self.results.contains_key(index))
    }

    /// Collected results in ascending index order.
    pub fn into_results(self) -> Vec<Envelope> {
        self.results.into_values().collect()
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}
