use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Action;

/// Upper bound on the hot-posts and most-played rankings.
pub const MAX_HOT_POSTS: usize = 10;

/// Cumulative counters and score for one post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStats {
    pub views: u64,
    pub plays: u64,
    pub pauses: u64,
    pub unmutes: u64,
    pub carousel_left: u64,
    pub carousel_right: u64,
    pub score: i64,
}

impl PostStats {
    /// Applies one action: bumps the matching counter and adds its weight
    /// to the cumulative score.
    pub fn record(&mut self, action: Action) {
        match action {
            Action::View => self.views += 1,
            Action::Play => self.plays += 1,
            Action::Pause => self.pauses += 1,
            Action::Unmute => self.unmutes += 1,
            Action::CarouselLeft => self.carousel_left += 1,
            Action::CarouselRight => self.carousel_right += 1,
        }
        self.score += action.weight();
    }
}

/// Running aggregates plus the derived rankings.
///
/// Mutated only by the flush worker; readers hold an immutable snapshot
/// handle published after each flush.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    start_time: DateTime<Utc>,
    total_events: u64,
    total_visitors: u64,
    hot_posts: Vec<String>,
    most_played: Vec<String>,
    post_stats: HashMap<String, PostStats>,
}

impl AggregateState {
    /// Creates a fresh state stamped with the current wall-clock time.
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            total_events: 0,
            total_visitors: 0,
            hot_posts: Vec::new(),
            most_played: Vec::new(),
            post_stats: HashMap::new(),
        }
    }

    /// Rebuilds a state from persisted fields.
    pub fn restore(
        start_time: DateTime<Utc>,
        total_events: u64,
        total_visitors: u64,
        hot_posts: Vec<String>,
        most_played: Vec<String>,
        post_stats: HashMap<String, PostStats>,
    ) -> Self {
        Self {
            start_time,
            total_events,
            total_visitors,
            hot_posts,
            most_played,
            post_stats,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn total_visitors(&self) -> u64 {
        self.total_visitors
    }

    pub fn hot_posts(&self) -> &[String] {
        &self.hot_posts
    }

    pub fn most_played(&self) -> &[String] {
        &self.most_played
    }

    pub fn post_stats(&self) -> &HashMap<String, PostStats> {
        &self.post_stats
    }

    pub fn set_start_time(&mut self, start_time: DateTime<Utc>) {
        self.start_time = start_time;
    }

    pub fn increment_total_events(&mut self) {
        self.total_events += 1;
    }

    pub fn increment_total_visitors(&mut self) {
        self.total_visitors += 1;
    }

    /// Returns the stats for `post_id`, creating a zeroed entry on first
    /// access.
    pub fn get_or_create_stats(&mut self, post_id: &str) -> &mut PostStats {
        self.post_stats.entry(post_id.to_string()).or_default()
    }

    /// Bulk replacement; the fold is responsible for length bounds.
    pub fn set_hot_posts(&mut self, posts: Vec<String>) {
        self.hot_posts = posts;
    }

    pub fn set_most_played(&mut self, posts: Vec<String>) {
        self.most_played = posts;
    }

    pub fn set_post_stats(&mut self, stats: HashMap<String, PostStats>) {
        self.post_stats = stats;
    }

    /// Deep copy of all fields.
    pub fn snapshot_copy(&self) -> Self {
        self.clone()
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_counter_and_score() {
        let mut stats = PostStats::default();
        stats.record(Action::Play);
        stats.record(Action::Play);
        stats.record(Action::Pause);

        assert_eq!(stats.plays, 2);
        assert_eq!(stats.pauses, 1);
        assert_eq!(stats.views, 0);
        assert_eq!(stats.score, 2 + 2 - 1);
    }

    #[test]
    fn test_get_or_create_stats() {
        let mut state = AggregateState::new();
        assert!(state.post_stats().is_empty());

        state.get_or_create_stats("p1").record(Action::View);
        state.get_or_create_stats("p1").record(Action::View);

        assert_eq!(state.post_stats().len(), 1);
        assert_eq!(state.post_stats()["p1"].views, 2);
    }

    #[test]
    fn test_counters() {
        let mut state = AggregateState::new();
        state.increment_total_events();
        state.increment_total_events();
        state.increment_total_visitors();

        assert_eq!(state.total_events(), 2);
        assert_eq!(state.total_visitors(), 1);
    }

    #[test]
    fn test_snapshot_copy_is_deep() {
        let mut state = AggregateState::new();
        state.get_or_create_stats("p1").record(Action::Play);
        state.set_hot_posts(vec!["p1".to_string()]);

        let copy = state.snapshot_copy();
        state.get_or_create_stats("p1").record(Action::Play);

        assert_eq!(copy.post_stats()["p1"].plays, 1);
        assert_eq!(state.post_stats()["p1"].plays, 2);
        assert_eq!(copy.hot_posts(), &["p1".to_string()]);
    }
}
