use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::keys::{self, CompositeKey};
use crate::url_utils;

/// A URL queued in the frontier. Immutable once enqueued.
///
/// `seed_docid` equals `docid` for seeds; for discovered URLs it names the
/// seed this URL transitively descends from. `host` is derived from the URL
/// at construction and is always lowercase.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct UrlRecord {
    pub docid: u64,
    pub seed_docid: u64,
    pub parent_docid: u64,
    pub priority: i8,
    pub depth: u16,
    pub url: String,
    pub host: String,
}

impl UrlRecord {
    /// Build a seed record. Returns `None` when no host can be derived.
    pub fn seed(docid: u64, url: impl Into<String>) -> Option<Self> {
        let url = url.into();
        let host = url_utils::extract_host(&url)?;
        Some(Self {
            docid,
            seed_docid: docid,
            parent_docid: 0,
            priority: 0,
            depth: 0,
            url,
            host,
        })
    }

    /// Build a record discovered on `parent`'s page, one level deeper and
    /// inheriting the parent's seed and priority.
    pub fn discovered(docid: u64, url: impl Into<String>, parent: &UrlRecord) -> Option<Self> {
        let url = url.into();
        let host = url_utils::extract_host(&url)?;
        Some(Self {
            docid,
            seed_docid: parent.seed_docid,
            parent_docid: parent.docid,
            priority: parent.priority,
            depth: parent.depth.saturating_add(1),
            url,
            host,
        })
    }

    pub fn is_seed(&self) -> bool {
        self.docid == self.seed_docid
    }

    /// The key this record is stored and dispatched under.
    pub fn sort_key(&self) -> CompositeKey {
        keys::composite_key(self.priority, self.depth, self.docid)
    }
}
