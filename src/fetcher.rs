use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::UrlRecord;

/// Politeness capability consumed by the dispatcher.
///
/// The implementor owns the per-host next-fetch-time table. The dispatcher
/// calls these methods while holding the frontier mutex, so implementations
/// must not block.
pub trait PageFetcher {
    /// Earliest wall-clock time this host may be fetched again.
    fn next_fetch_time(&self, host: &str) -> Instant;

    /// Record that `url` was handed to a worker, pushing the host's next
    /// fetch time out by the politeness delay.
    fn select(&self, url: &UrlRecord);

    /// Clear a selection so the host becomes immediately eligible again.
    fn unselect(&self, url: &UrlRecord);
}

/// Fixed-delay politeness tracker, one next-allowed instant per host.
#[derive(Debug)]
pub struct PolitenessTracker {
    delay: Duration,
    next_allowed: DashMap<String, Instant>,
    epoch: Instant,
}

impl PolitenessTracker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_allowed: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl PageFetcher for PolitenessTracker {
    fn next_fetch_time(&self, host: &str) -> Instant {
        // Hosts never fetched fall back to the tracker's epoch, which is
        // always in the past relative to the dispatcher's clock.
        self.next_allowed
            .get(host)
            .map(|entry| *entry)
            .unwrap_or(self.epoch)
    }

    fn select(&self, url: &UrlRecord) {
        self.next_allowed
            .insert(url.host.clone(), Instant::now() + self.delay);
    }

    fn unselect(&self, url: &UrlRecord) {
        self.next_allowed.remove(&url.host);
    }
}
