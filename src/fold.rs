use std::collections::{HashMap, HashSet};

use crate::event::Event;
use crate::state::{AggregateState, PostStats, MAX_HOT_POSTS};

/// Pure fold of one event batch into an aggregate state.
///
/// Takes the prior state by reference and produces a new state value,
/// leaving the input untouched. `tally` must run before
/// `rank_hot_posts`; the manager invokes them in that order on every
/// flush.
pub struct Fold<'a> {
    batch: &'a [Event],
    prev: AggregateState,
    current: AggregateState,
}

impl<'a> Fold<'a> {
    pub fn new(batch: &'a [Event], prev: &AggregateState) -> Self {
        Self {
            batch,
            prev: prev.clone(),
            current: prev.clone(),
        }
    }

    /// Folds the batch into the working state: totals, per-post counters
    /// and scores, and the most-played ranking.
    ///
    /// Visitor counting is distinct per batch, not per lifetime: a user
    /// seen in three separate batches adds three visitors.
    pub fn tally(&mut self) {
        let batch = self.batch;
        let mut seen_users: HashSet<&str> = HashSet::new();

        for event in batch {
            self.current.increment_total_events();

            if seen_users.insert(event.user_id.as_str()) {
                self.current.increment_total_visitors();
            }

            self.current
                .get_or_create_stats(&event.post_id)
                .record(event.action);
        }

        let mut played: Vec<(String, u64)> = self
            .current
            .post_stats()
            .iter()
            .map(|(post_id, stats)| (post_id.clone(), stats.plays))
            .collect();
        played.sort_by(|a, b| b.1.cmp(&a.1));

        let most_played = played
            .into_iter()
            .take(MAX_HOT_POSTS)
            .map(|(post_id, _)| post_id)
            .collect();
        self.current.set_most_played(most_played);
    }

    /// Recomputes the hot-posts ranking and trims the stats map to the
    /// hot set.
    ///
    /// Candidate scores are the retained per-post scores plus the batch
    /// contribution on top. The provisional top list is then merged
    /// against the previous hot list: once the list is full, a previous
    /// hot post whose retained score strictly beats the lowest retained
    /// score in the list displaces that entry. A list shorter than the
    /// bound is never extended by the merge.
    pub fn rank_hot_posts(&mut self) {
        let batch = self.batch;

        let mut batch_scores: HashMap<&str, i64> = HashMap::new();
        for event in batch {
            *batch_scores.entry(event.post_id.as_str()).or_insert(0) += event.score();
        }

        let mut all_scores: HashMap<String, i64> = self
            .current
            .post_stats()
            .iter()
            .map(|(post_id, stats)| (post_id.clone(), stats.score))
            .collect();
        for (post_id, score) in &batch_scores {
            *all_scores.entry((*post_id).to_string()).or_insert(0) += score;
        }

        let mut ranked: Vec<(String, i64)> = all_scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut hot_posts: Vec<String> = Vec::with_capacity(MAX_HOT_POSTS);
        let mut hot_stats: HashMap<String, PostStats> = HashMap::new();

        for (post_id, score) in ranked.into_iter().take(MAX_HOT_POSTS) {
            match self.current.post_stats().get(&post_id) {
                Some(stats) => {
                    hot_stats.insert(post_id.clone(), stats.clone());
                }
                None => {
                    hot_stats.insert(
                        post_id.clone(),
                        PostStats {
                            score,
                            ..PostStats::default()
                        },
                    );
                }
            }
            hot_posts.push(post_id);
        }

        for post_id in self.prev.hot_posts() {
            if hot_posts.iter().any(|hot| hot == post_id) {
                continue;
            }
            if hot_posts.len() < MAX_HOT_POSTS {
                continue;
            }
            let Some(prev_stats) = self.prev.post_stats().get(post_id) else {
                continue;
            };

            let mut lowest_score = i64::MAX;
            let mut lowest_idx = 0;
            for (idx, hot) in hot_posts.iter().enumerate() {
                if let Some(stats) = hot_stats.get(hot) {
                    if stats.score < lowest_score {
                        lowest_score = stats.score;
                        lowest_idx = idx;
                    }
                }
            }

            if prev_stats.score > lowest_score {
                let evicted = std::mem::replace(&mut hot_posts[lowest_idx], post_id.clone());
                hot_stats.remove(&evicted);
                hot_stats.insert(post_id.clone(), prev_stats.clone());
            }
        }

        self.current.set_hot_posts(hot_posts);
        self.current.set_post_stats(hot_stats);
    }

    /// Snapshots the working state as the new baseline, so another batch
    /// can be folded on top with the same `Fold`.
    pub fn commit(&mut self) {
        self.prev = self.current.clone();
    }

    pub fn current(&self) -> &AggregateState {
        &self.current
    }

    pub fn into_state(self) -> AggregateState {
        self.current
    }
}
