use std::collections::HashMap;

/// In-memory cache of live offspring counts per seed docid.
///
/// Mirrors the persisted `seed_count` tree: an entry exists only while the
/// seed has live descendants, and the durable copy is written inside the
/// same transaction as the URL mutation it belongs to.
#[derive(Debug, Default)]
pub struct SeedCounter {
    counts: HashMap<u64, i32>,
}

impl SeedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_counts(counts: HashMap<u64, i32>) -> Self {
        Self { counts }
    }

    pub fn get(&self, seed_docid: u64) -> i32 {
        self.counts.get(&seed_docid).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, seed_docid: u64) {
        *self.counts.entry(seed_docid).or_insert(0) += 1;
    }

    /// Decrement and return the new value. Entries vanish at zero; a
    /// negative result means the caller's bookkeeping is broken.
    pub fn decrement(&mut self, seed_docid: u64) -> i32 {
        let next = self.get(seed_docid) - 1;
        if next <= 0 {
            self.counts.remove(&seed_docid);
        } else {
            self.counts.insert(seed_docid, next);
        }
        next
    }

    /// Clear the counter for a seed, returning the prior value.
    pub fn reset(&mut self, seed_docid: u64) -> i32 {
        self.counts.remove(&seed_docid).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &i32)> + '_ {
        self.counts.iter()
    }
}
