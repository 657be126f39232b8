//! Popularity counter for info hashes seen on the network

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
struct Counts {
    /// Keys in first-seen order with their counts
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

/// Counts how often each key was observed
///
/// Ranking is stable: keys with equal counts keep their first-seen order.
#[derive(Default)]
pub struct PopularityCounter {
    counts: Mutex<Counts>,
}

impl PopularityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of `key`
    pub fn record(&self, key: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        match counts.index.get(key) {
            Some(&pos) => counts.entries[pos].1 += 1,
            None => {
                let pos = counts.entries.len();
                counts.entries.push((key.to_string(), 1));
                counts.index.insert(key.to_string(), pos);
            }
        }
    }

    /// The `k` most observed keys, count descending
    pub fn top(&self, k: usize) -> Vec<(String, u64)> {
        let mut ranked = self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone();
        // sort_by is stable, ties keep first-seen order
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(k);
        ranked
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
