use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{HarvestError, Result};

/// A pending batch file awaiting harvest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchHandle {
    pub name: String,
    pub path: PathBuf,
}

/// Staging directories of batch files: `pending_dir` holds work, retired
/// batches move to `processed_dir`.
#[derive(Debug, Clone)]
pub struct BatchQueue {
    cfg: QueueConfig,
}

impl BatchQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        Self { cfg }
    }

    /// Regular, non-hidden files of the pending directory, by name. An empty
    /// result means there is no more work.
    pub async fn list_pending_batches(&self) -> Result<Vec<BatchHandle>> {
        let dir = &self.cfg.pending_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "pending directory missing; nothing to do");
                return Ok(Vec::new());
            }
            Err(e) => return Err(HarvestError::io(dir, e)),
        };

        let mut batches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarvestError::io(dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| HarvestError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            batches.push(BatchHandle {
                name,
                path: entry.path(),
            });
        }
        batches.sort();
        debug!(dir = %dir.display(), count = batches.len(), "listed pending batches");
        Ok(batches)
    }

    /// Distinct, trimmed, non-empty keys of one batch.
    pub async fn read_keys(&self, batch: &BatchHandle) -> Result<BTreeSet<String>> {
        let bytes = tokio::fs::read(&batch.path)
            .await
            .map_err(|e| HarvestError::io(&batch.path, e))?;
        parse_keys(&batch.path, &bytes, &self.cfg.key_column)
    }

    /// Move a consumed batch into the processed directory. Retiring a batch
    /// that is no longer pending is an error.
    pub async fn retire(&self, batch: &BatchHandle) -> Result<PathBuf> {
        if !tokio::fs::try_exists(&batch.path)
            .await
            .map_err(|e| HarvestError::io(&batch.path, e))?
        {
            return Err(HarvestError::BatchAlreadyRetired(batch.path.clone()));
        }

        let processed = &self.cfg.processed_dir;
        tokio::fs::create_dir_all(processed)
            .await
            .map_err(|e| HarvestError::io(processed, e))?;

        let mut dest = processed.join(&batch.name);
        if tokio::fs::try_exists(&dest)
            .await
            .map_err(|e| HarvestError::io(&dest, e))?
        {
            let stamped = format!("{}.{}", batch.name, Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
            warn!(batch = %batch.name, renamed = %stamped, "processed dir already holds this name");
            dest = processed.join(stamped);
        }

        move_file(&batch.path, &dest).await?;
        info!(batch = %batch.name, dest = %dest.display(), "batch retired");
        Ok(dest)
    }
}

fn parse_keys(path: &Path, bytes: &[u8], key_column: &str) -> Result<BTreeSet<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = rdr.headers().map_err(|e| HarvestError::InvalidBatch {
        path: path.to_path_buf(),
        detail: format!("unreadable header: {e}"),
    })?;
    let idx = headers
        .iter()
        .position(|h| h == key_column)
        .ok_or_else(|| HarvestError::InvalidBatch {
            path: path.to_path_buf(),
            detail: format!("no `{key_column}` column"),
        })?;

    let mut keys = BTreeSet::new();
    for (row, rec) in rdr.records().enumerate() {
        match rec {
            Ok(rec) => {
                if let Some(key) = rec.get(idx).filter(|k| !k.is_empty()) {
                    keys.insert(key.to_string());
                }
            }
            Err(err) => warn!(path = %path.display(), row = row + 1, %err, "skipping unreadable batch row"),
        }
    }
    Ok(keys)
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        // Pending and processed dirs live on different filesystems.
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| HarvestError::io(to, e))?;
            tokio::fs::remove_file(from)
                .await
                .map_err(|e| HarvestError::io(from, e))
        }
        Err(e) => Err(HarvestError::io(from, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_in(root: &Path) -> BatchQueue {
        BatchQueue::new(QueueConfig {
            pending_dir: root.join("pending"),
            processed_dir: root.join("processed"),
            key_column: "account".into(),
        })
    }

    #[tokio::test]
    async fn lists_only_visible_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue_in(dir.path());
        let pending = dir.path().join("pending");
        std::fs::create_dir_all(pending.join("nested")).unwrap();
        std::fs::write(pending.join("b.csv"), "account\nx\n").unwrap();
        std::fs::write(pending.join("a.csv"), "account\ny\n").unwrap();
        std::fs::write(pending.join(".DS_Store"), "").unwrap();

        let names: Vec<_> = q
            .list_pending_batches()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn missing_pending_dir_means_no_work() {
        let dir = tempfile::tempdir().unwrap();
        assert!(queue_in(dir.path()).list_pending_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_are_trimmed_and_deduped() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue_in(dir.path());
        std::fs::create_dir_all(dir.path().join("pending")).unwrap();
        let path = dir.path().join("pending/batch.csv");
        std::fs::write(&path, "id,account\n1, alice \n2,bob\n3,alice\n4,\n").unwrap();
        let batch = BatchHandle {
            name: "batch.csv".into(),
            path,
        };
        let keys: Vec<_> = q.read_keys(&batch).await.unwrap().into_iter().collect();
        assert_eq!(keys, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn batch_without_key_column_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.csv");
        std::fs::write(&path, "handle\nalice\n").unwrap();
        let batch = BatchHandle {
            name: "batch.csv".into(),
            path,
        };
        let err = queue_in(dir.path()).read_keys(&batch).await.unwrap_err();
        assert!(matches!(err, HarvestError::InvalidBatch { .. }));
    }

    #[tokio::test]
    async fn second_retire_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue_in(dir.path());
        std::fs::create_dir_all(dir.path().join("pending")).unwrap();
        std::fs::write(dir.path().join("pending/one.csv"), "account\nalice\n").unwrap();
        let batch = q.list_pending_batches().await.unwrap().remove(0);

        let dest = q.retire(&batch).await.unwrap();
        assert_eq!(dest, dir.path().join("processed/one.csv"));
        assert!(q.list_pending_batches().await.unwrap().is_empty());

        let err = q.retire(&batch).await.unwrap_err();
        assert!(matches!(err, HarvestError::BatchAlreadyRetired(_)));
    }

    #[tokio::test]
    async fn retire_never_overwrites_processed_files() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue_in(dir.path());
        std::fs::create_dir_all(dir.path().join("pending")).unwrap();
        std::fs::create_dir_all(dir.path().join("processed")).unwrap();
        std::fs::write(dir.path().join("processed/one.csv"), "account\nold\n").unwrap();
        std::fs::write(dir.path().join("pending/one.csv"), "account\nnew\n").unwrap();
        let batch = q.list_pending_batches().await.unwrap().remove(0);

        let dest = q.retire(&batch).await.unwrap();
        assert_ne!(dest, dir.path().join("processed/one.csv"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("processed/one.csv")).unwrap(),
            "account\nold\n"
        );
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "account\nnew\n");
    }
}
