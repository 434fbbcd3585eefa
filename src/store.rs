use std::collections::HashMap;
use std::path::Path;

use rkyv::{archived_root, AlignedVec, Deserialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::Transactional;
use thiserror::Error;

use crate::keys::{self, CompositeKey, COMPOSITE_KEY_LEN};
use crate::models::UrlRecord;

const URLS_TREE: &str = "urls";
const SEED_COUNT_TREE: &str = "seed_count";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    fn from_txn(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Database(e),
        }
    }
}

/// Durable ordered store for the frontier.
///
/// Two sled trees: `urls` maps the 10-byte composite key to the encoded
/// record, `seed_count` holds the per-seed offspring count as a 4-byte
/// big-endian signed integer (absent means zero). In resumable mode every
/// mutation runs in one transaction across both trees and is flushed before
/// the call returns; otherwise writes go straight to the `urls` tree, the
/// `seed_count` tree stays untouched and durability is best-effort.
pub struct UrlStore {
    db: sled::Db,
    urls: sled::Tree,
    seed_counts: sled::Tree,
    resumable: bool,
}

impl UrlStore {
    pub fn open<P: AsRef<Path>>(folder: P, resumable: bool) -> Result<Self, StoreError> {
        let db = sled::open(folder)?;
        let urls = db.open_tree(URLS_TREE)?;
        let seed_counts = db.open_tree(SEED_COUNT_TREE)?;
        if !resumable {
            // A non-resumable crawl always starts from an empty frontier.
            urls.clear()?;
            seed_counts.clear()?;
        }
        Ok(Self {
            db,
            urls,
            seed_counts,
            resumable,
        })
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    /// Insert a record under its composite key, bumping the seed count.
    /// Returns false without writing anything when the key already exists.
    pub fn insert(&self, record: &UrlRecord) -> Result<bool, StoreError> {
        let key = record.sort_key();
        let value = encode_record(record)?;
        if self.resumable {
            let seed = record.seed_docid;
            let added = (&self.urls, &self.seed_counts)
                .transaction(
                    |(urls, counts)| -> ConflictableTransactionResult<bool, StoreError> {
                        if urls.get(&key[..])?.is_some() {
                            return Ok(false);
                        }
                        urls.insert(&key[..], value.as_slice())?;
                        bump_seed_count(counts, seed, 1)?;
                        Ok(true)
                    },
                )
                .map_err(StoreError::from_txn)?;
            if added {
                self.db.flush()?;
            }
            Ok(added)
        } else {
            if self.urls.get(key)?.is_some() {
                return Ok(false);
            }
            self.urls.insert(&key[..], value.as_slice())?;
            Ok(true)
        }
    }

    /// Insert a batch atomically. The returned flags line up with the input;
    /// false marks a key that was already present (including duplicates
    /// earlier in the same batch).
    pub fn insert_batch(&self, records: &[UrlRecord]) -> Result<Vec<bool>, StoreError> {
        let mut encoded = Vec::with_capacity(records.len());
        for record in records {
            encoded.push((record.sort_key(), encode_record(record)?, record.seed_docid));
        }
        if self.resumable {
            let added = (&self.urls, &self.seed_counts)
                .transaction(
                    |(urls, counts)| -> ConflictableTransactionResult<Vec<bool>, StoreError> {
                        let mut added = Vec::with_capacity(encoded.len());
                        for (key, value, seed) in &encoded {
                            if urls.get(&key[..])?.is_some() {
                                added.push(false);
                                continue;
                            }
                            urls.insert(&key[..], value.as_slice())?;
                            bump_seed_count(counts, *seed, 1)?;
                            added.push(true);
                        }
                        Ok(added)
                    },
                )
                .map_err(StoreError::from_txn)?;
            if added.iter().any(|a| *a) {
                self.db.flush()?;
            }
            Ok(added)
        } else {
            let mut added = Vec::with_capacity(encoded.len());
            for (key, value, _) in &encoded {
                if self.urls.get(key)?.is_some() {
                    added.push(false);
                    continue;
                }
                self.urls.insert(&key[..], value.as_slice())?;
                added.push(true);
            }
            Ok(added)
        }
    }

    /// Delete a record and decrement its seed count. Returns false when the
    /// key was not present.
    pub fn remove(&self, record: &UrlRecord) -> Result<bool, StoreError> {
        let key = record.sort_key();
        if self.resumable {
            let seed = record.seed_docid;
            let removed = (&self.urls, &self.seed_counts)
                .transaction(
                    |(urls, counts)| -> ConflictableTransactionResult<bool, StoreError> {
                        if urls.remove(&key[..])?.is_none() {
                            return Ok(false);
                        }
                        bump_seed_count(counts, seed, -1)?;
                        Ok(true)
                    },
                )
                .map_err(StoreError::from_txn)?;
            if removed {
                self.db.flush()?;
            }
            Ok(removed)
        } else {
            Ok(self.urls.remove(&key[..])?.is_some())
        }
    }

    /// Delete every record descending from `seed_docid` along with the
    /// seed-count entry, in one transaction. Returns the number deleted.
    pub fn remove_offspring(&self, seed_docid: u64) -> Result<u64, StoreError> {
        let mut doomed: Vec<CompositeKey> = Vec::new();
        for entry in self.urls.iter() {
            let (key, value) = entry?;
            if key.len() != COMPOSITE_KEY_LEN {
                continue;
            }
            let record = decode_record(&value)?;
            if record.seed_docid == seed_docid {
                let mut composite = [0u8; COMPOSITE_KEY_LEN];
                composite.copy_from_slice(&key);
                doomed.push(composite);
            }
        }
        let seed_count_key = keys::seed_key(seed_docid);
        if self.resumable {
            (&self.urls, &self.seed_counts)
                .transaction(
                    |(urls, counts)| -> ConflictableTransactionResult<(), StoreError> {
                        for key in &doomed {
                            urls.remove(&key[..])?;
                        }
                        counts.remove(&seed_count_key[..])?;
                        Ok(())
                    },
                )
                .map_err(StoreError::from_txn)?;
            self.db.flush()?;
        } else {
            for key in &doomed {
                self.urls.remove(&key[..])?;
            }
        }
        Ok(doomed.len() as u64)
    }

    pub fn get(&self, key: &CompositeKey) -> Result<Option<UrlRecord>, StoreError> {
        match self.urls.get(&key[..])? {
            Some(value) => Ok(Some(decode_record(&value)?)),
            None => Ok(None),
        }
    }

    /// The record with the globally smallest composite key.
    pub fn first(&self) -> Result<Option<UrlRecord>, StoreError> {
        match self.urls.first()? {
            Some((_, value)) => Ok(Some(decode_record(&value)?)),
            None => Ok(None),
        }
    }

    /// All live records in global crawl order.
    pub fn scan(&self) -> Result<Vec<UrlRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.urls.iter() {
            let (_, value) = entry?;
            records.push(decode_record(&value)?);
        }
        Ok(records)
    }

    /// The persisted offspring-counter snapshot.
    pub fn load_seed_counts(&self) -> Result<HashMap<u64, i32>, StoreError> {
        let mut counts = HashMap::new();
        for entry in self.seed_counts.iter() {
            let (key, value) = entry?;
            if key.len() != 8 || value.len() < 4 {
                continue;
            }
            let mut seed = [0u8; 8];
            seed.copy_from_slice(&key);
            counts.insert(u64::from_be_bytes(seed), decode_count(&value));
        }
        Ok(counts)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for UrlStore {
    fn drop(&mut self) {
        let _ = self.db.flush();
    }
}

fn bump_seed_count(
    counts: &TransactionalTree,
    seed_docid: u64,
    delta: i32,
) -> Result<(), ConflictableTransactionError<StoreError>> {
    let key = keys::seed_key(seed_docid);
    let current = counts.get(&key[..])?.map(|v| decode_count(&v)).unwrap_or(0);
    let next = current + delta;
    if next <= 0 {
        counts.remove(&key[..])?;
    } else {
        counts.insert(&key[..], &next.to_be_bytes()[..])?;
    }
    Ok(())
}

fn encode_record(record: &UrlRecord) -> Result<AlignedVec, StoreError> {
    rkyv::to_bytes::<_, 512>(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> Result<UrlRecord, StoreError> {
    // sled hands back buffers with no alignment guarantee; realign first.
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    let archived = unsafe { archived_root::<UrlRecord>(&aligned) };
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| StoreError::Serialization("invalid url record".into()))
}

fn decode_count(bytes: &[u8]) -> i32 {
    if bytes.len() < 4 {
        return 0;
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    i32::from_be_bytes(buf)
}
