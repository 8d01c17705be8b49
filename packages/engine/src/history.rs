//! Bounded run history persisted as a JSON file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use stock_sync_models::{HistoryEntry, HistoryStats};

/// Entries kept when no limit is configured.
pub const DEFAULT_MAX_ENTRIES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Accepts one record per finished run.
pub trait HistorySink: Send + Sync {
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the entry could not be stored.
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError>;
}

/// Newest-first history in a single JSON file.
///
/// Every write replaces the whole file through a temporary file and a
/// rename, so a crash mid-write leaves the previous history intact.
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    max_entries: usize,
    lock: Mutex<()>,
}

impl JsonHistoryStore {
    /// A store at `path` keeping at most `max_entries` (minimum 1).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored entries, newest first. A missing file is an empty
    /// history.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns [`HistoryError`] if the history cannot be loaded.
    pub fn stats(&self) -> Result<HistoryStats, HistoryError> {
        let entries = self.load()?;
        let successful = entries.iter().filter(|e| e.succeeded()).count() as u64;
        Ok(HistoryStats {
            total_runs: entries.len() as u64,
            successful_runs: successful,
            failed_runs: entries.len() as u64 - successful,
            last_sync_at: entries.iter().map(|e| e.timestamp).max(),
        })
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the empty history cannot be written.
    pub fn clear(&self) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.write(&[])?;
        log::info!("[history] cleared {}", self.path.display());
        Ok(())
    }

    fn write(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl HistorySink for JsonHistoryStore {
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.insert(0, entry);
        entries.truncate(self.max_entries);
        self.write(&entries)?;
        log::debug!(
            "[history] stored run, {} entr{} kept",
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" }
        );
        Ok(())
    }
}
