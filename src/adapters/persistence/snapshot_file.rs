//! Snapshot File - Atomic JSON Warm-Start Store
//!
//! Saves the final snapshot set at shutdown and reloads it at start so
//! the hub never serves an empty store after a restart. Writes go to a
//! temporary file first, then are atomically renamed into place.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, instrument};

use crate::domain::snapshot::Snapshot;

/// Current file format version.
const FORMAT_VERSION: u32 = 1;

/// On-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    snapshots: Vec<Snapshot>,
}

/// Atomic JSON snapshot file.
pub struct SnapshotFile {
    /// Final path.
    path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
        }
    }

    /// Save snapshots atomically (tmp → rename).
    #[instrument(skip(self, snapshots))]
    pub async fn save(&self, snapshots: &[Snapshot]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .context("Failed to create snapshot directory")?;
        }

        let doc = SnapshotDocument {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            snapshots: snapshots.to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc).context("Failed to serialize snapshots")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp snapshot file")?;
        fs::rename(&self.tmp_path, &self.path)
            .await
            .context("Failed to rename snapshot file")?;

        info!(
            path = %self.path.display(),
            snapshots = snapshots.len(),
            "Snapshots saved"
        );
        Ok(())
    }

    /// Load the last saved snapshots. Empty when no file exists yet.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Vec<Snapshot>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            info!(path = %self.path.display(), "No snapshot file found, starting cold");
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&self.path)
            .await
            .context("Failed to read snapshot file")?;
        let doc: SnapshotDocument =
            serde_json::from_str(&json).context("Failed to parse snapshot file")?;
        anyhow::ensure!(
            doc.version == FORMAT_VERSION,
            "Unsupported snapshot file version {}",
            doc.version
        );

        info!(
            snapshots = doc.snapshots.len(),
            saved_at = %doc.saved_at,
            "Snapshots loaded"
        );
        Ok(doc.snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::Symbol;
    use crate::domain::tick::{Origin, Tick};
    use rust_decimal_macros::dec;

    fn snapshot() -> Snapshot {
        let tick = Tick::new(
            Symbol::new("ETH", "USDT"),
            dec!(3000.25),
            Some(dec!(2)),
            Utc::now(),
            Origin::Primary,
        )
        .unwrap();
        Snapshot::from_tick(&tick)
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("snapshots.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshots.json");
        let file = SnapshotFile::new(&path);

        let saved = vec![snapshot()];
        file.save(&saved).await.unwrap();
        let loaded = file.load().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, saved[0].symbol);
        assert_eq!(loaded[0].last_price, dec!(3000.25));
        assert_eq!(loaded[0].updated_at, saved[0].updated_at);
        assert!(!dir.path().join("nested").join("snapshots.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.json");
        std::fs::write(&path, "{").unwrap();
        assert!(SnapshotFile::new(&path).load().await.is_err());
    }
}
