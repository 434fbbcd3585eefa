use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Frontier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierConfig {
    /// Minimum gap in milliseconds between successive fetches to the same
    /// host. Also paces how often blocked workers re-poll.
    pub politeness_delay_ms: u64,

    /// Enables transactional, durable storage and recovery on reopen. When
    /// off, writes are deferred and the frontier starts empty.
    pub resumable: bool,

    /// Root directory for the embedded stores.
    pub storage_folder: PathBuf,

    /// Stop accepting new URLs once this many have ever been scheduled.
    /// `None` means unbounded.
    pub max_pages: Option<u64>,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            politeness_delay_ms: 200,
            resumable: false,
            storage_folder: PathBuf::from("./frontier-data"),
            max_pages: None,
        }
    }
}

impl FrontierConfig {
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}
