//! Previous/current cache for monotonic kernel counters.
//!
//! Kernel counters (CPU ticks, disk sectors, interface bytes) only grow until
//! a reset. A rate needs two observations, so the first value seen for a key
//! becomes the baseline and produces no output.

use std::collections::HashMap;
use std::hash::Hash;

/// Key used by the system collectors: object name plus field name,
/// e.g. `("sda", "reads")`.
pub type CounterKey = (String, &'static str);

#[derive(Debug, Clone, Copy)]
struct Baseline {
    raw: u64,
    /// Sweep epoch of the last update.
    epoch: u64,
}

#[derive(Debug)]
pub struct DeltaCounterStore<K> {
    entries: HashMap<K, Baseline>,
    epoch: u64,
}

impl<K> Default for DeltaCounterStore<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            epoch: 0,
        }
    }
}

impl<K: Eq + Hash> DeltaCounterStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `raw` for `key` and returns the rate since the previous value.
    ///
    /// Returns `None` for the first observation of a key and when `elapsed`
    /// is not positive. A counter that went backwards reports `Some(0.0)`.
    pub fn update(&mut self, key: K, raw: u64, elapsed: f64) -> Option<f64> {
        let epoch = self.epoch;
        let previous = self.entries.insert(key, Baseline { raw, epoch })?;

        if elapsed <= 0.0 || !elapsed.is_finite() {
            return None;
        }
        if raw < previous.raw {
            return Some(0.0);
        }
        Some((raw - previous.raw) as f64 / elapsed)
    }

    pub fn is_seeded(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops keys that were not updated since the previous sweep.
    pub fn sweep(&mut self) {
        let epoch = self.epoch;
        self.entries.retain(|_, baseline| baseline.epoch == epoch);
        self.epoch += 1;
    }
}

impl DeltaCounterStore<CounterKey> {
    /// Updates every field of `object` and returns the rates only when all
    /// of them produced one.
    ///
    /// Objects seen for the first time (a disk hot-plugged mid-run) are
    /// therefore skipped for one tick instead of being half written.
    pub fn update_group(
        &mut self,
        object: &str,
        fields: &[(&'static str, u64)],
        elapsed: f64,
    ) -> Option<Vec<(&'static str, f64)>> {
        let mut rates = Vec::with_capacity(fields.len());
        let mut complete = true;
        for &(name, raw) in fields {
            match self.update((object.to_string(), name), raw, elapsed) {
                Some(rate) => rates.push((name, rate)),
                None => complete = false,
            }
        }
        complete.then_some(rates)
    }
}
