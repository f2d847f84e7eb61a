use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::{AggregateState, PostStats, MAX_HOT_POSTS};

/// On-disk form of the aggregate state.
///
/// Only the top-bounded rankings are kept, and stats only for posts that
/// appear in the persisted hot list. The file is rewritten in full on
/// every flush.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    start_time: DateTime<Utc>,
    total_events: u64,
    total_visitors: u64,
    hot_posts: Vec<String>,
    most_played: Vec<String>,
    post_stats: HashMap<String, PostStats>,
}

impl SnapshotDoc {
    fn from_state(state: &AggregateState) -> Self {
        let hot_posts: Vec<String> = state
            .hot_posts()
            .iter()
            .take(MAX_HOT_POSTS)
            .cloned()
            .collect();
        let most_played: Vec<String> = state
            .most_played()
            .iter()
            .take(MAX_HOT_POSTS)
            .cloned()
            .collect();

        let post_stats = hot_posts
            .iter()
            .filter_map(|post_id| {
                state
                    .post_stats()
                    .get(post_id)
                    .map(|stats| (post_id.clone(), stats.clone()))
            })
            .collect();

        Self {
            start_time: state.start_time(),
            total_events: state.total_events(),
            total_visitors: state.total_visitors(),
            hot_posts,
            most_played,
            post_stats,
        }
    }

    fn into_state(self) -> AggregateState {
        AggregateState::restore(
            self.start_time,
            self.total_events,
            self.total_visitors,
            self.hot_posts,
            self.most_played,
            self.post_stats,
        )
    }
}

/// Persists the state as a single JSON document.
///
/// Writes to a sibling temp file and renames over the target so a crash
/// mid-write leaves either the prior or the new full document.
pub async fn save(path: &Path, state: &AggregateState) -> Result<()> {
    let doc = SnapshotDoc::from_state(state);
    let data = serde_json::to_vec_pretty(&doc).context("encoding state snapshot")?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &data)
        .await
        .with_context(|| format!("writing snapshot temp file {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming snapshot into {}", path.display()))?;

    Ok(())
}

/// Loads the persisted state, or returns a fresh one when the file is
/// missing or unreadable. Parse failures are logged and never propagated.
pub async fn load_or_default(path: &Path) -> AggregateState {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no previous state found, starting fresh");
            return AggregateState::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read state snapshot, starting fresh");
            return AggregateState::new();
        }
    };

    match serde_json::from_str::<SnapshotDoc>(&data) {
        Ok(doc) => {
            let state = doc.into_state();
            info!(
                total_events = state.total_events(),
                total_visitors = state.total_visitors(),
                hot_posts = state.hot_posts().len(),
                "previous state loaded",
            );
            state
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse state snapshot, starting fresh");
            AggregateState::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::event::Action;

    fn sample_state() -> AggregateState {
        let mut state = AggregateState::new();
        for _ in 0..3 {
            state.increment_total_events();
        }
        state.increment_total_visitors();
        state.get_or_create_stats("p1").record(Action::Play);
        state.get_or_create_stats("p1").record(Action::View);
        state.set_hot_posts(vec!["p1".to_string()]);
        state.set_most_played(vec!["p1".to_string()]);
        state
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let state = sample_state();
        save(&path, &state).await.unwrap();

        let loaded = load_or_default(&path).await;
        assert_eq!(loaded.total_events(), 3);
        assert_eq!(loaded.total_visitors(), 1);
        assert_eq!(loaded.hot_posts(), state.hot_posts());
        assert_eq!(loaded.most_played(), state.most_played());
        assert_eq!(loaded.post_stats()["p1"], state.post_stats()["p1"]);
        assert_eq!(
            loaded.start_time().timestamp_millis(),
            state.start_time().timestamp_millis(),
        );
    }

    #[tokio::test]
    async fn test_missing_file_yields_fresh_state() {
        let dir = TempDir::new().unwrap();
        let state = load_or_default(&dir.path().join("state.json")).await;
        assert_eq!(state.total_events(), 0);
        assert!(state.hot_posts().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_yields_fresh_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let state = load_or_default(&path).await;
        assert_eq!(state.total_events(), 0);
    }

    #[tokio::test]
    async fn test_persisted_stats_limited_to_hot_posts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut state = sample_state();
        state.get_or_create_stats("cold").record(Action::View);
        save(&path, &state).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["post_stats"].get("p1").is_some());
        assert!(value["post_stats"].get("cold").is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let state = sample_state();
        save(&path, &state).await.unwrap();

        let mut newer = state.clone();
        newer.increment_total_events();
        save(&path, &newer).await.unwrap();

        let loaded = load_or_default(&path).await;
        assert_eq!(loaded.total_events(), 4);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
