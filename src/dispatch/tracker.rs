//! Job tracking
//!
//! Counts jobs by outcome and keeps the ids of jobs currently in flight.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

use crate::protocol::{JobResponse, ServiceId};

/// Final classification of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler returned a result
    Succeeded,
    /// Handler failed, panicked or timed out
    Failed,
    /// No handler registered for the service name
    Unsupported,
}

/// Snapshot of tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub unsupported: u64,
    pub in_flight: usize,
}

impl JobStats {
    /// Jobs that have produced a response
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.unsupported
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: u64,
    succeeded: u64,
    failed: u64,
    unsupported: u64,
}

/// Tracks in-flight jobs and totals since startup
#[derive(Debug, Default)]
pub struct JobTracker {
    /// In-flight jobs by service id, with the number of copies in flight
    active: RwLock<HashMap<ServiceId, (usize, Instant)>>,
    counters: RwLock<Counters>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job as received and in flight
    pub fn start(&self, service_id: &ServiceId) {
        self.counters.write().received += 1;
        self.active
            .write()
            .entry(service_id.clone())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, Instant::now()));
    }

    /// Record a job's outcome; returns its time in flight in milliseconds
    pub fn finish(&self, service_id: &ServiceId, outcome: JobOutcome) -> u64 {
        {
            let mut counters = self.counters.write();
            match outcome {
                JobOutcome::Succeeded => counters.succeeded += 1,
                JobOutcome::Failed => counters.failed += 1,
                JobOutcome::Unsupported => counters.unsupported += 1,
            }
        }

        let mut active = self.active.write();
        let Some((remaining, elapsed)) = active.get_mut(service_id).map(|(count, started)| {
            *count -= 1;
            (*count, started.elapsed().as_millis() as u64)
        }) else {
            return 0;
        };

        if remaining == 0 {
            active.remove(service_id);
        }
        elapsed
    }

    /// Classify a response produced by the dispatcher and record it
    pub fn finish_response(&self, response: &JobResponse, unsupported: bool) -> u64 {
        let outcome = if unsupported {
            JobOutcome::Unsupported
        } else if response.is_success() {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Failed
        };
        self.finish(&response.service_id, outcome)
    }

    /// Ids of jobs currently in flight, sorted
    pub fn in_flight(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.active.read().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn in_flight_count(&self) -> usize {
        self.active.read().values().map(|(count, _)| count).sum()
    }

    pub fn stats(&self) -> JobStats {
        let counters = self.counters.read();
        JobStats {
            received: counters.received,
            succeeded: counters.succeeded,
            failed: counters.failed,
            unsupported: counters.unsupported,
            in_flight: self.in_flight_count(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
