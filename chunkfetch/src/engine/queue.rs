//! Per-tier download queue.
//!
//! The queue is an ordered list of job handles plus the tier-wide count of
//! in-flight chunk requests. It never owns jobs; the manager's arena does.
//!
//! # Ordering
//!
//! Each member carries a [`Priority`] captured at admission:
//!
//! 1. Higher priority epoch first (work requested after a viewport change
//!    beats stale work)
//! 2. Within an epoch, boosted admissions ahead of plain ones
//! 3. Otherwise FIFO: a new member goes behind everything of equal priority
//!
//! A load-first admission splices the job to the head regardless of priority.
//!
//! # Example
//!
//! ```ignore
//! let mut queue = DownloadQueue::new(16);
//! queue.admit(a, Priority::new(1, false), false);
//! queue.admit(b, Priority::new(2, false), false);
//! queue.admit(c, Priority::new(2, true), false);
//! assert_eq!(queue.jobs(), vec![c, b, a]);
//! ```

use super::JobId;

// =============================================================================
// Priority
// =============================================================================

/// Effective queue priority of a job. Compares by epoch, then boost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    /// Priority epoch current when the job was admitted.
    pub epoch: u64,

    /// Admitted with a priority boost.
    pub boosted: bool,
}

impl Priority {
    pub fn new(epoch: u64, boosted: bool) -> Self {
        Self { epoch, boosted }
    }
}

/// Result of an admission request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The job was inserted or moved.
    Placed,
    /// The job was already placed at least as well as requested.
    Unchanged,
}

// =============================================================================
// Download Queue
// =============================================================================

/// Ordered membership list and in-flight counter of one tier.
#[derive(Debug)]
pub struct DownloadQueue {
    /// Members, head first.
    order: Vec<(JobId, Priority)>,

    /// Chunk requests currently in flight for this tier.
    in_flight: usize,

    /// Cap on `in_flight`.
    max_in_flight: usize,
}

impl DownloadQueue {
    /// Creates an empty queue with the given in-flight cap (at least 1).
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            order: Vec::new(),
            in_flight: 0,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Link `job` at the position `priority` and `load_first` call for.
    ///
    /// A member already at an equal or higher priority (and already at the
    /// head, for load-first) is left alone. Otherwise it is re-linked with
    /// the higher of its old and requested priority.
    pub fn admit(&mut self, job: JobId, priority: Priority, load_first: bool) -> Admission {
        let priority = match self.position(job) {
            Some(index) => {
                let current = self.order[index].1;
                if current >= priority && (!load_first || index == 0) {
                    return Admission::Unchanged;
                }
                self.order.remove(index);
                current.max(priority)
            }
            None => priority,
        };

        let index = if load_first {
            0
        } else {
            self.order
                .iter()
                .position(|(_, p)| *p < priority)
                .unwrap_or(self.order.len())
        };
        self.order.insert(index, (job, priority));
        Admission::Placed
    }

    /// Unlink `job`. Returns whether it was a member.
    pub fn remove(&mut self, job: JobId) -> bool {
        match self.position(job) {
            Some(index) => {
                self.order.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job: JobId) -> bool {
        self.position(job).is_some()
    }

    /// Index of `job` from the head.
    pub fn position(&self, job: JobId) -> Option<usize> {
        self.order.iter().position(|(id, _)| *id == job)
    }

    /// Priority `job` is linked with.
    #[cfg(test)]
    pub(crate) fn priority_of(&self, job: JobId) -> Option<Priority> {
        self.order
            .iter()
            .find(|(id, _)| *id == job)
            .map(|(_, p)| *p)
    }

    /// Members in service order.
    pub fn jobs(&self) -> Vec<JobId> {
        self.order.iter().map(|(id, _)| *id).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Chunk requests in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[cfg(test)]
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Whether another chunk request may be issued.
    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.max_in_flight
    }

    /// Count one issued request.
    pub fn acquire(&mut self) {
        debug_assert!(self.has_capacity());
        self.in_flight += 1;
    }

    /// Count one resolved or cancelled request.
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}
