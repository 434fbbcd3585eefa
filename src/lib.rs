//! Polite, resumable web-crawl frontier.
//!
//! The frontier decides which URL each worker fetches next, subject to
//! per-host politeness delays, priority/depth/discovery ordering, bounded
//! in-flight work and durable recovery after restart. URLs live in an
//! ordered embedded store keyed by a binary-sortable composite of
//! (priority, depth, docid); in-memory per-host queues mirror the store for
//! fast dispatch.

pub mod config;
pub mod fetcher;
pub mod frontier;
pub mod host_queue;
pub mod keys;
pub mod logging;
pub mod models;
pub mod offspring;
pub mod registry;
pub mod store;
pub mod url_utils;
pub mod worker;

// Re-export main types for library usage
pub use config::FrontierConfig;
pub use fetcher::{PageFetcher, PolitenessTracker};
pub use frontier::{Frontier, ValidationError};
pub use models::UrlRecord;
pub use store::{StoreError, UrlStore};
pub use worker::{Worker, WorkerHandle};
