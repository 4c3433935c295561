//! Persistence layer for tracker snapshots
//!
//! Each tracker instance owns one JSON file under the configured storage
//! directory, keyed by the tracker's unique id. The record holds exactly the
//! snapshot state: start value, end value and the date they belong to.
//!
//! Saves are dispatched fire-and-forget by the runtime so publishing a new
//! reading is never delayed by storage I/O; the only reader runs once at
//! startup, so out-of-order completion of background writes is harmless.

use crate::error::Result;
use crate::logging::{LogContext, get_logger_with_context};
use crate::tracker::SnapshotState;
use std::path::{Path, PathBuf};

/// File name prefix for per-tracker snapshot files
pub const STORAGE_KEY: &str = "offpeak_snapshots";

/// Store for one tracker's snapshot state
#[derive(Clone)]
pub struct SnapshotStore {
    file_path: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl SnapshotStore {
    /// Create a store for the tracker identified by `unique_id`
    pub fn new<P: AsRef<Path>>(storage_dir: P, unique_id: &str) -> Self {
        let file_path = storage_dir
            .as_ref()
            .join(format!("{}_{}.json", STORAGE_KEY, sanitize(unique_id)));
        let context = LogContext::new("persistence").with_tracker_id(unique_id.to_string());
        Self {
            file_path,
            logger: get_logger_with_context(context),
        }
    }

    /// Path of the underlying snapshot file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Load snapshot state from disk, defaulting to empty when absent
    pub async fn load(&self) -> Result<SnapshotState> {
        if !self.file_path.exists() {
            self.logger.info("No snapshot file found, using defaults");
            return Ok(SnapshotState::default());
        }

        let contents = tokio::fs::read_to_string(&self.file_path).await?;
        let state = serde_json::from_str(&contents)?;
        self.logger.info("Loaded snapshots from disk");

        Ok(state)
    }

    /// Save snapshot state to disk
    pub async fn save(&self, state: &SnapshotState) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.file_path, contents).await?;
        self.logger.debug("Saved snapshots to disk");

        Ok(())
    }
}

/// Replace path-hostile characters in a tracker identity
fn sanitize(unique_id: &str) -> String {
    unique_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
