// SPDX-License-Identifier: MPL-2.0

//! Media index notifications
//!
//! After a still or a recording is written the session asks a [`MediaIndex`]
//! to pick the file up. Failures are logged by the caller and never affect
//! the session.

use std::path::Path;
use tracing::info;

/// Indexer told about new capture files
pub trait MediaIndex: Send + Sync {
    /// Make `path` visible to media browsers
    fn scan(&self, path: &Path) -> Result<(), String>;
}

/// Index that only checks the file landed and logs it
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMediaIndex;

impl MediaIndex for LoggingMediaIndex {
    fn scan(&self, path: &Path) -> Result<(), String> {
        let meta = std::fs::metadata(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        if !meta.is_file() {
            return Err(format!("{} is not a file", path.display()));
        }
        info!(path = %path.display(), size = meta.len(), "Media file available");
        Ok(())
    }
}
