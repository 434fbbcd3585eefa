use crate::models::UrlRecord;

/// Pending URLs for one host, ordered by composite key.
///
/// The queue is a sorted vector plus a head slot index and a claim flag;
/// the head is always addressed through the slot index rather than a
/// retained reference, so an insert landing below a claimed head can never
/// leave two live handles to the same record disagreeing about it. While
/// the head is claimed the slot stays pinned on the claimed record; once
/// the claim is released the slot snaps back to the smallest key.
#[derive(Debug)]
pub struct HostQueue {
    host: String,
    urls: Vec<UrlRecord>,
    head: usize,
    head_claimed: bool,
}

impl HostQueue {
    pub fn new(host: String) -> Self {
        Self {
            host,
            urls: Vec::new(),
            head: 0,
            head_claimed: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn head_claimed(&self) -> bool {
        self.head_claimed
    }

    /// A host is claimable when it has work and nobody holds its head.
    pub fn is_claimable(&self) -> bool {
        !self.urls.is_empty() && !self.head_claimed
    }

    /// The URL currently addressed by the head slot.
    pub fn peek_head(&self) -> Option<&UrlRecord> {
        self.urls.get(self.head)
    }

    /// Insert at the position dictated by the composite key. An insert at
    /// or below a claimed head shifts the slot so the claim stays pinned.
    pub fn enqueue(&mut self, record: UrlRecord) {
        let key = record.sort_key();
        let pos = self.urls.partition_point(|u| u.sort_key() < key);
        self.urls.insert(pos, record);
        if self.head_claimed && pos <= self.head {
            self.head += 1;
        }
    }

    /// Claim the head for a worker. Returns `None` when the queue is empty
    /// or the head is already claimed.
    pub fn claim_head(&mut self) -> Option<&UrlRecord> {
        if !self.is_claimable() {
            return None;
        }
        self.head = 0;
        self.head_claimed = true;
        self.urls.first()
    }

    /// Release a claimed head. With `requeue` the record stays queued and
    /// the slot resets to the smallest key; otherwise the record is removed
    /// and returned.
    pub fn release_head(&mut self, requeue: bool) -> Option<UrlRecord> {
        if !self.head_claimed {
            return None;
        }
        self.head_claimed = false;
        let released = if requeue {
            None
        } else {
            Some(self.urls.remove(self.head))
        };
        self.head = 0;
        released
    }

    /// Remove every record matching `pred`. The second return value is true
    /// when the claimed head itself was removed, in which case the claim is
    /// dropped and the caller must orphan the worker's assignment.
    pub fn remove_matching<P>(&mut self, pred: P) -> (Vec<UrlRecord>, bool)
    where
        P: Fn(&UrlRecord) -> bool,
    {
        let claimed_docid = if self.head_claimed {
            self.urls.get(self.head).map(|u| u.docid)
        } else {
            None
        };

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.urls.len());
        for record in self.urls.drain(..) {
            if pred(&record) {
                removed.push(record);
            } else {
                kept.push(record);
            }
        }
        self.urls = kept;

        let mut claim_lost = false;
        match claimed_docid {
            Some(docid) => match self.urls.iter().position(|u| u.docid == docid) {
                Some(idx) => self.head = idx,
                None => {
                    claim_lost = true;
                    self.head_claimed = false;
                    self.head = 0;
                }
            },
            None => self.head = 0,
        }
        (removed, claim_lost)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UrlRecord> {
        self.urls.iter()
    }
}
