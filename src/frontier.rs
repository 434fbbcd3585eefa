use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::FrontierConfig;
use crate::fetcher::PageFetcher;
use crate::keys::CompositeKey;
use crate::models::UrlRecord;
use crate::offspring::SeedCounter;
use crate::registry::HostRegistry;
use crate::store::{StoreError, UrlStore};
use crate::worker::Worker;

/// Entries kept in the per-host operation journal.
const JOURNAL_CAPACITY: usize = 64;

/// Floor for the blocked-worker poll interval.
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Journal host used for problems not attributable to a single host.
const GLOBAL: &str = "*";

/// Raised by [`Frontier::validate`] when the queue administration is
/// inconsistent. `host` is `"*"` for problems spanning hosts.
#[derive(Debug, Clone, Error)]
#[error("frontier invariant broken for host {host}: {reason}")]
pub struct ValidationError {
    pub host: String,
    pub reason: String,
}

/// A URL handed to a worker and not yet released. `orphaned` marks
/// assignments whose record was deleted underneath the worker by
/// `remove_offspring`; their release is a no-op against the store.
struct Assignment {
    record: UrlRecord,
    orphaned: bool,
}

/// Recent operations per host, dumped when an invariant violation forces
/// an abort so the events leading up to it are visible.
#[derive(Default)]
struct Journal {
    entries: HashMap<String, VecDeque<String>>,
}

impl Journal {
    fn record(&mut self, host: &str, line: String) {
        let log = self.entries.entry(host.to_string()).or_default();
        if log.len() == JOURNAL_CAPACITY {
            log.pop_front();
        }
        log.push_back(line);
    }

    fn dump(&self, host: &str) {
        if let Some(log) = self.entries.get(host) {
            for line in log {
                error!(host, "{line}");
            }
        }
    }
}

struct FrontierInner {
    store: UrlStore,
    hosts: HostRegistry,
    in_progress: HashMap<u64, Assignment>,
    seeds: SeedCounter,
    journal: Journal,
    scheduled: u64,
    processed: u64,
    finished: bool,
}

/// The work-queue engine: an ordered, per-host URL store together with the
/// coordination protocol between worker threads and the politeness-aware
/// dispatcher.
///
/// One mutex guards all mutable in-memory state; disk transactions commit
/// while it is held. Workers blocked in [`Frontier::get_next_url`] wait on
/// a condition variable and are woken by every mutating operation and by
/// [`Frontier::finish`].
pub struct Frontier {
    config: FrontierConfig,
    inner: Mutex<FrontierInner>,
    waiters: Condvar,
}

impl Frontier {
    /// Open the frontier, rebuilding the per-host queues, ready set and
    /// offspring counters from the persisted store. URLs that were
    /// in progress when the previous process died come back as freshly
    /// queued; they were never deleted from the store.
    pub fn open(config: FrontierConfig) -> Result<Self, StoreError> {
        let store = UrlStore::open(&config.storage_folder, config.resumable)?;
        let seeds = SeedCounter::from_counts(store.load_seed_counts()?);

        let mut hosts = HostRegistry::new();
        let records = store.scan()?;
        let restored = records.len() as u64;
        for record in records {
            hosts.enqueue(record);
        }
        if restored > 0 {
            info!(urls = restored, "rescheduling urls from previous crawl");
        }

        Ok(Self {
            config,
            inner: Mutex::new(FrontierInner {
                store,
                hosts,
                in_progress: HashMap::new(),
                seeds,
                journal: Journal::default(),
                scheduled: restored,
                processed: 0,
                finished: false,
            }),
            waiters: Condvar::new(),
        })
    }

    pub fn config(&self) -> &FrontierConfig {
        &self.config
    }

    /// Enqueue one URL. Returns false when the composite key is already
    /// present or the scheduled-pages budget is exhausted.
    pub fn schedule(&self, url: UrlRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let mut added = false;
        if !self.budget_exhausted(&inner, 0) && inner.store.insert(&url)? {
            inner.seeds.increment(url.seed_docid);
            inner.journal.record(
                &url.host,
                format!(
                    "enqueue docid={} seed={} prio={} depth={}",
                    url.docid, url.seed_docid, url.priority, url.depth
                ),
            );
            inner.hosts.enqueue(url);
            inner.scheduled += 1;
            added = true;
        }
        self.waiters.notify_all();
        Ok(added)
    }

    /// Enqueue a batch in one transaction. Returns the URLs that were not
    /// enqueued: duplicates, plus any overflowing the scheduled budget. A
    /// storage error aborts the whole batch.
    pub fn schedule_all(&self, urls: Vec<UrlRecord>) -> Result<Vec<UrlRecord>, StoreError> {
        let mut inner = self.inner.lock();
        let mut accepted = Vec::with_capacity(urls.len());
        let mut rejected = Vec::new();
        for url in urls {
            if self.budget_exhausted(&inner, accepted.len() as u64) {
                rejected.push(url);
            } else {
                accepted.push(url);
            }
        }

        let added = inner.store.insert_batch(&accepted)?;
        for (url, added) in accepted.into_iter().zip(added) {
            if !added {
                rejected.push(url);
                continue;
            }
            inner.seeds.increment(url.seed_docid);
            inner.journal.record(
                &url.host,
                format!(
                    "enqueue docid={} seed={} prio={} depth={} (batch)",
                    url.docid, url.seed_docid, url.priority, url.depth
                ),
            );
            inner.hosts.enqueue(url);
            inner.scheduled += 1;
        }
        self.waiters.notify_all();
        Ok(rejected)
    }

    /// Claim the next URL for `worker`, honoring priority order and the
    /// fetcher's politeness windows. Blocks while nothing is eligible and
    /// returns `None` once the frontier is finished.
    pub fn get_next_url<W: Worker, F: PageFetcher>(
        &self,
        worker: &W,
        fetcher: &F,
    ) -> Option<UrlRecord> {
        let wait = self.config.politeness_delay().max(MIN_WAIT);
        let mut inner = self.inner.lock();
        if inner.in_progress.contains_key(&worker.id()) {
            Self::fatal(&inner, GLOBAL, "worker requested a url while already holding one");
        }
        loop {
            if inner.finished {
                return None;
            }
            if let Some(url) = Self::select_next(&mut inner, worker.id(), fetcher) {
                return Some(url);
            }
            let _ = self.waiters.wait_for(&mut inner, wait);
        }
    }

    /// Pick the politeness-eligible ready host whose head carries the
    /// globally smallest composite key, and claim that head.
    fn select_next<F: PageFetcher>(
        inner: &mut FrontierInner,
        worker_id: u64,
        fetcher: &F,
    ) -> Option<UrlRecord> {
        let now = Instant::now();
        let mut best: Option<(CompositeKey, String)> = None;
        for host in inner.hosts.ready_hosts() {
            let Some(head) = inner.hosts.queue(host).and_then(|q| q.peek_head()) else {
                continue;
            };
            if fetcher.next_fetch_time(host) > now {
                continue;
            }
            let key = head.sort_key();
            match &best {
                Some((best_key, _)) if *best_key <= key => {}
                _ => best = Some((key, host.clone())),
            }
        }

        let (_, host) = best?;
        let record = inner.hosts.claim(&host)?;
        fetcher.select(&record);
        inner.journal.record(
            &host,
            format!("claim docid={} worker={}", record.docid, worker_id),
        );
        inner.in_progress.insert(
            worker_id,
            Assignment {
                record: record.clone(),
                orphaned: false,
            },
        );
        Some(record)
    }

    /// Mark a claimed URL as successfully fetched: delete it from the store
    /// and its host queue, decrement the offspring counter and free the
    /// worker's slot. Invokes `worker.on_seed_end` when this was the last
    /// live offspring of its seed.
    pub fn set_processed<W: Worker>(&self, worker: &W, url: &UrlRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let orphaned = Self::check_assignment(&inner, worker.id(), url);

        if !orphaned {
            // Commit the store first; in-memory state only changes after.
            if !inner.store.remove(url)? {
                warn!(url = %url.url, "finished url was missing from the store");
            }
        }

        inner.in_progress.remove(&worker.id());
        inner.processed += 1;
        if orphaned {
            inner.journal.record(
                &url.host,
                format!("finish orphaned docid={} worker={}", url.docid, worker.id()),
            );
        } else {
            match inner.hosts.release(&url.host, false) {
                Some(head) if head.docid == url.docid => {}
                _ => Self::fatal(&inner, &url.host, "released head does not match the finished url"),
            }
            inner.journal.record(
                &url.host,
                format!("finish docid={} worker={}", url.docid, worker.id()),
            );
            let remaining = inner.seeds.decrement(url.seed_docid);
            if remaining < 0 {
                Self::fatal(&inner, &url.host, "offspring counter went negative");
            }
            if remaining == 0 {
                worker.on_seed_end(url.seed_docid);
            }
        }
        self.waiters.notify_all();
        Ok(())
    }

    /// Return a claimed URL to the head of its host queue without touching
    /// the store or the offspring counter, and clear the fetcher's
    /// selection so the host is immediately eligible again.
    pub fn abandon<W: Worker, F: PageFetcher>(&self, worker: &W, url: &UrlRecord, fetcher: &F) {
        let mut inner = self.inner.lock();
        let orphaned = Self::check_assignment(&inner, worker.id(), url);

        inner.in_progress.remove(&worker.id());
        if orphaned {
            inner.journal.record(
                &url.host,
                format!("abandon orphaned docid={} worker={}", url.docid, worker.id()),
            );
        } else {
            inner.hosts.release(&url.host, true);
            fetcher.unselect(url);
            inner.journal.record(
                &url.host,
                format!("abandon docid={} worker={}", url.docid, worker.id()),
            );
        }
        self.waiters.notify_all();
    }

    /// Delete every live descendant of `seed_docid` from the store and the
    /// host queues, returning how many were deleted. A worker holding one
    /// of them keeps its in-progress slot, flagged so its release becomes a
    /// no-op against the store. Aborts when the deletions disagree with the
    /// offspring counter.
    pub fn remove_offspring(&self, seed_docid: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let expected = inner.seeds.get(seed_docid);
        let removed = inner.store.remove_offspring(seed_docid)?;
        if removed != expected as u64 {
            Self::fatal(
                &inner,
                GLOBAL,
                &format!(
                    "offspring mismatch for seed {seed_docid}: counted {expected}, removed {removed}"
                ),
            );
        }

        let (dropped, lost_claims) = inner.hosts.remove_matching(|u| u.seed_docid == seed_docid);
        if dropped.len() as u64 != removed {
            Self::fatal(
                &inner,
                GLOBAL,
                &format!(
                    "host queues held {} urls for seed {seed_docid} but the store held {removed}",
                    dropped.len()
                ),
            );
        }
        for host in &lost_claims {
            inner.journal.record(host, format!("claimed head removed with seed {seed_docid}"));
        }
        for assignment in inner
            .in_progress
            .values_mut()
            .filter(|a| !a.orphaned && a.record.seed_docid == seed_docid)
        {
            assignment.orphaned = true;
        }
        for record in &dropped {
            inner.journal.record(
                &record.host,
                format!("offspring removed docid={} seed={seed_docid}", record.docid),
            );
        }
        inner.seeds.reset(seed_docid);
        self.waiters.notify_all();
        Ok(removed)
    }

    /// Flag the frontier as finished and wake every blocked worker; they
    /// observe the flag and return `None` from [`Frontier::get_next_url`].
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        if !inner.finished {
            inner.finished = true;
            info!("frontier finished, waking blocked workers");
        }
        self.waiters.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Queued URLs across all hosts, claimed heads included.
    pub fn queue_size(&self) -> u64 {
        self.inner.lock().hosts.total_len() as u64
    }

    pub fn num_in_progress(&self) -> usize {
        self.inner.lock().in_progress.len()
    }

    /// Live descendants of `seed_docid` still in the frontier.
    pub fn num_offspring(&self, seed_docid: u64) -> u64 {
        self.inner.lock().seeds.get(seed_docid).max(0) as u64
    }

    /// URLs ever accepted by `schedule`/`schedule_all` in this process,
    /// seeded from the store length on reopen.
    pub fn num_scheduled(&self) -> u64 {
        self.inner.lock().scheduled
    }

    /// URLs completed through `set_processed` in this process lifetime.
    pub fn num_processed(&self) -> u64 {
        self.inner.lock().processed
    }

    /// Every live record in global crawl order. A read failure is retried
    /// once before surfacing.
    pub fn snapshot(&self) -> Result<Vec<UrlRecord>, StoreError> {
        let inner = self.inner.lock();
        match inner.store.scan() {
            Ok(records) => Ok(records),
            Err(first_try) => {
                warn!(error = %first_try, "store scan failed, retrying once");
                inner.store.scan()
            }
        }
    }

    /// Flush the backing store.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.inner.lock().store.flush()
    }

    /// Check the queue administration end to end. On failure the journal
    /// for the offending host is dumped and the error names it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let inner = self.inner.lock();
        let result = Self::validate_locked(&inner);
        if let Err(err) = &result {
            error!(host = %err.host, reason = %err.reason, "frontier validation failed");
            inner.journal.dump(&err.host);
        }
        result
    }

    fn validate_locked(inner: &FrontierInner) -> Result<(), ValidationError> {
        let fail = |host: &str, reason: String| {
            Err(ValidationError {
                host: host.to_string(),
                reason,
            })
        };

        let mut seen_docids: HashSet<u64> = HashSet::new();
        let mut live_keys: HashSet<CompositeKey> = HashSet::new();
        let mut live_per_seed: HashMap<u64, i32> = HashMap::new();

        for (host, queue) in inner.hosts.iter() {
            if queue.is_empty() && !queue.head_claimed() {
                return fail(host, "empty host queue retained".into());
            }
            let mut prev: Option<CompositeKey> = None;
            for record in queue.iter() {
                if record.host != *host {
                    return fail(host, format!("docid {} filed under the wrong host", record.docid));
                }
                let key = record.sort_key();
                if let Some(prev) = prev {
                    if prev >= key {
                        return fail(host, "host queue not strictly sorted by key".into());
                    }
                }
                prev = Some(key);
                if !seen_docids.insert(record.docid) {
                    return fail(host, format!("docid {} present in two queues", record.docid));
                }
                live_keys.insert(key);
                *live_per_seed.entry(record.seed_docid).or_insert(0) += 1;
            }
            if queue.head_claimed() {
                let Some(head) = queue.peek_head() else {
                    return fail(host, "claimed head slot out of range".into());
                };
                if !inner
                    .in_progress
                    .values()
                    .any(|a| !a.orphaned && a.record.docid == head.docid)
                {
                    return fail(
                        host,
                        format!("claimed head {} missing from the in-progress table", head.docid),
                    );
                }
            }
            if inner.hosts.is_ready(host) != queue.is_claimable() {
                return fail(host, "ready-set membership out of sync".into());
            }
        }

        for assignment in inner.in_progress.values().filter(|a| !a.orphaned) {
            let record = &assignment.record;
            let claimed_head = inner
                .hosts
                .queue(&record.host)
                .filter(|q| q.head_claimed())
                .and_then(|q| q.peek_head())
                .map(|h| h.docid);
            if claimed_head != Some(record.docid) {
                return fail(
                    &record.host,
                    format!("in-progress docid {} is not its host's claimed head", record.docid),
                );
            }
        }

        for (seed, live) in &live_per_seed {
            if inner.seeds.get(*seed) != *live {
                return fail(
                    GLOBAL,
                    format!(
                        "offspring counter for seed {seed} is {} but {live} urls are live",
                        inner.seeds.get(*seed)
                    ),
                );
            }
        }
        for (seed, count) in inner.seeds.iter() {
            if live_per_seed.get(seed).copied().unwrap_or(0) != *count {
                return fail(
                    GLOBAL,
                    format!("offspring counter for seed {seed} counts urls that are not live"),
                );
            }
        }

        let stored = match inner.store.scan() {
            Ok(stored) => stored,
            Err(e) => return fail(GLOBAL, format!("store scan failed: {e}")),
        };
        if stored.len() != live_keys.len() {
            return fail(
                GLOBAL,
                format!(
                    "store holds {} urls but the host queues hold {}",
                    stored.len(),
                    live_keys.len()
                ),
            );
        }
        for record in &stored {
            if !live_keys.contains(&record.sort_key()) {
                return fail(
                    &record.host,
                    format!("stored docid {} missing from the host queues", record.docid),
                );
            }
        }
        Ok(())
    }

    /// Look up the worker's assignment and confirm it matches `url`.
    /// Returns whether the assignment is orphaned; mismatches are fatal.
    fn check_assignment(inner: &FrontierInner, worker_id: u64, url: &UrlRecord) -> bool {
        match inner.in_progress.get(&worker_id) {
            Some(assignment) if assignment.record.docid == url.docid => assignment.orphaned,
            Some(_) => Self::fatal(inner, &url.host, "worker released a url it did not claim"),
            None => Self::fatal(inner, &url.host, "release from a worker that holds no url"),
        }
    }

    fn budget_exhausted(&self, inner: &FrontierInner, pending: u64) -> bool {
        self.config
            .max_pages
            .map(|max| inner.scheduled + pending >= max)
            .unwrap_or(false)
    }

    /// Invariant violations indicate a bug, not a runtime condition: dump
    /// the journal for the affected host and abort.
    #[cold]
    fn fatal(inner: &FrontierInner, host: &str, reason: &str) -> ! {
        error!(host, reason, "frontier invariant violated, aborting");
        inner.journal.dump(host);
        panic!("frontier invariant violated for host {host}: {reason}");
    }
}
