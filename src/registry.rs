use std::collections::{HashMap, HashSet};

use crate::host_queue::HostQueue;
use crate::models::UrlRecord;

/// All per-host queues plus the ready set.
///
/// A host is ready when its queue is non-empty and its head is unclaimed.
/// Queues are created lazily on first enqueue and dropped once they empty
/// out with no claim outstanding.
#[derive(Debug, Default)]
pub struct HostRegistry {
    queues: HashMap<String, HostQueue>,
    ready: HashSet<String>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, record: UrlRecord) {
        let host = record.host.clone();
        let queue = self
            .queues
            .entry(host.clone())
            .or_insert_with(|| HostQueue::new(host.clone()));
        queue.enqueue(record);
        if queue.is_claimable() {
            self.ready.insert(host);
        }
    }

    pub fn ready_hosts(&self) -> impl Iterator<Item = &String> + '_ {
        self.ready.iter()
    }

    pub fn is_ready(&self, host: &str) -> bool {
        self.ready.contains(host)
    }

    pub fn queue(&self, host: &str) -> Option<&HostQueue> {
        self.queues.get(host)
    }

    /// Claim the head of `host` for dispatch, dropping it from the ready
    /// set. Returns a copy of the claimed record.
    pub fn claim(&mut self, host: &str) -> Option<UrlRecord> {
        let queue = self.queues.get_mut(host)?;
        let record = queue.claim_head()?.clone();
        self.ready.remove(host);
        Some(record)
    }

    /// Release the claimed head of `host`, requeueing or removing it, and
    /// bring the ready set and host lifecycle back in line.
    pub fn release(&mut self, host: &str, requeue: bool) -> Option<UrlRecord> {
        let queue = self.queues.get_mut(host)?;
        let released = queue.release_head(requeue);
        self.refresh(host);
        released
    }

    /// Remove every record matching `pred` across all hosts. Returns the
    /// removed records and the hosts whose claimed head was among them.
    pub fn remove_matching<P>(&mut self, pred: P) -> (Vec<UrlRecord>, Vec<String>)
    where
        P: Fn(&UrlRecord) -> bool,
    {
        let mut all_removed = Vec::new();
        let mut lost_claims = Vec::new();
        let hosts: Vec<String> = self.queues.keys().cloned().collect();
        for host in hosts {
            let Some(queue) = self.queues.get_mut(&host) else {
                continue;
            };
            let (removed, claim_lost) = queue.remove_matching(&pred);
            if claim_lost {
                lost_claims.push(host.clone());
            }
            all_removed.extend(removed);
            self.refresh(&host);
        }
        (all_removed, lost_claims)
    }

    fn refresh(&mut self, host: &str) {
        let Some(queue) = self.queues.get(host) else {
            self.ready.remove(host);
            return;
        };
        if queue.is_empty() && !queue.head_claimed() {
            self.queues.remove(host);
            self.ready.remove(host);
        } else if queue.is_claimable() {
            self.ready.insert(host.to_string());
        } else {
            self.ready.remove(host);
        }
    }

    /// Total queued URLs across hosts, claimed heads included.
    pub fn total_len(&self) -> usize {
        self.queues.values().map(HostQueue::len).sum()
    }

    pub fn host_count(&self) -> usize {
        self.queues.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostQueue)> + '_ {
        self.queues.iter()
    }
}
