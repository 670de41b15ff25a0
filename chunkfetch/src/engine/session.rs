//! Session slot load balancing.
//!
//! A tier exposes a few parallel transport channels. Each new chunk request
//! goes to the slot with the fewest bytes in flight; ties go to the lowest
//! slot index.

/// In-flight byte counters for the session slots of one tier.
#[derive(Debug, Clone)]
pub struct SessionPool {
    loads: Vec<u64>,
}

impl SessionPool {
    /// Creates a pool with `slots` slots (at least 1).
    pub fn new(slots: usize) -> Self {
        Self {
            loads: vec![0; slots.max(1)],
        }
    }

    /// Slot with the smallest current load.
    pub fn least_loaded(&self) -> usize {
        self.loads
            .iter()
            .enumerate()
            .min_by_key(|(index, load)| (**load, *index))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Attribute `bytes` requested on `slot`.
    pub fn acquire(&mut self, slot: usize, bytes: u64) {
        if let Some(load) = self.loads.get_mut(slot) {
            *load += bytes;
        }
    }

    /// Remove `bytes` previously attributed to `slot`.
    pub fn release(&mut self, slot: usize, bytes: u64) {
        if let Some(load) = self.loads.get_mut(slot) {
            *load = load.saturating_sub(bytes);
        }
    }

    /// Current load per slot.
    pub fn loads(&self) -> &[u64] {
        &self.loads
    }

    /// Total bytes in flight across slots.
    #[cfg(test)]
    pub(crate) fn total(&self) -> u64 {
        self.loads.iter().sum()
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.loads.len()
    }
}
