use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::event::{Action, Event};

/// One write-ahead log line: the raw event as received, before any
/// aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub post_id: String,
    pub user_id: String,
    pub action: Action,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl From<&Event> for WalRecord {
    fn from(event: &Event) -> Self {
        Self {
            post_id: event.post_id.clone(),
            user_id: event.user_id.clone(),
            action: event.action,
            created_at: event.created_at,
        }
    }
}

/// Append-only JSON-lines log of ingested events.
///
/// The log is written in ingest order and grows without bound; it is
/// never read back by the engine. Durability is best-effort: callers
/// treat append failures as non-fatal.
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if needed) the log file in append mode.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening WAL at {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Appends one record as a single JSON line.
    pub async fn append(&mut self, record: &WalRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("encoding WAL record")?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to WAL at {}", self.path.display()))?;

        self.file
            .flush()
            .await
            .with_context(|| format!("flushing WAL at {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn record(post_id: &str, user_id: &str, action: Action) -> WalRecord {
        WalRecord {
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            action,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_writes_json_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let mut wal = Wal::open(&path).await.unwrap();
        wal.append(&record("p1", "u1", Action::View)).await.unwrap();
        wal.append(&record("p2", "u2", Action::Play)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: WalRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.post_id, "p1");
        assert_eq!(first.action, Action::View);

        let second: WalRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.post_id, "p2");
        assert_eq!(second.action, Action::Play);
    }

    #[tokio::test]
    async fn test_reopen_appends_to_existing_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut wal = Wal::open(&path).await.unwrap();
            wal.append(&record("p1", "u1", Action::View)).await.unwrap();
        }
        {
            let mut wal = Wal::open(&path).await.unwrap();
            wal.append(&record("p2", "u1", Action::Pause))
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_record_wire_shape() {
        let rec = WalRecord {
            post_id: "p1".to_string(),
            user_id: "u1".to_string(),
            action: Action::CarouselLeft,
            created_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        };

        let json = serde_json::to_string(&rec).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["action"], "carousel_left");
        assert_eq!(value["created_at"], 1_700_000_000_123i64);
    }
}
