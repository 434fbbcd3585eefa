/// A crawl worker as seen by the frontier.
pub trait Worker {
    /// Stable identifier keying the in-progress table.
    fn id(&self) -> u64;

    /// Invoked by the frontier when the last live offspring of
    /// `seed_docid` has completed.
    fn on_seed_end(&self, seed_docid: u64);
}

/// Minimal worker handle for threads that do not track seed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    id: u64,
}

impl WorkerHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

impl Worker for WorkerHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn on_seed_end(&self, _seed_docid: u64) {}
}
