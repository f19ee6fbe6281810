//! Snapshot store for persisting cache entries to disk
//!
//! Lets the in-memory cache survive restarts: entries are written as JSON with
//! their wall-clock `cached_at`, and restored with the age they had, so a warm
//! start keeps serving fresh keys without calling the upstream and still has
//! stale data to fall back on.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// One persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry<T> {
    /// Cache key
    pub key: String,
    /// The cached data
    pub data: T,
    /// When the data was cached
    pub cached_at: DateTime<Utc>,
}

/// Contents of a snapshot file
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot<T> {
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
    /// Entries, most recently used first
    pub entries: Vec<SnapshotEntry<T>>,
}

/// Reads and writes cache snapshots
///
/// Snapshots live as JSON files in an XDG-compliant cache directory
/// (`~/.cache/coinwatch/` on Linux).
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Directory where snapshot files are stored
    dir: PathBuf,
}

impl SnapshotStore {
    /// Creates a store using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "coinwatch")?;
        Some(Self {
            dir: project_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Creates a store in a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Writes `entries` under `name`, creating the directory if needed
    pub fn save<T: Serialize>(
        &self,
        name: &str,
        entries: Vec<SnapshotEntry<T>>,
    ) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let count = entries.len();
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            entries,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let path = self.path(name);
        fs::write(&path, json)?;
        info!(path = %path.display(), entries = count, "Saved cache snapshot");
        Ok(())
    }

    /// Reads the snapshot stored under `name`
    ///
    /// Returns `None` if the file doesn't exist or cannot be parsed.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Option<Snapshot<T>> {
        let path = self.path(name);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable snapshot");
                None
            }
        }
    }
}
