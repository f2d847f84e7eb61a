use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action identifies the kind of user interaction on a post.
///
/// Serialized as the lowercase wire name (`view`, `carousel_left`, ...)
/// in both the WAL and inbound receiver messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Action {
    View,
    Play,
    Pause,
    Unmute,
    CarouselLeft,
    CarouselRight,
}

/// Number of distinct actions, used for counter array sizing.
pub const ACTION_CARDINALITY: usize = 6;

impl Action {
    /// Fixed scoring weight for this action.
    pub const fn weight(self) -> i64 {
        match self {
            Self::View => 1,
            Self::Play => 2,
            Self::Pause => -1,
            Self::Unmute => 1,
            Self::CarouselLeft => 0,
            Self::CarouselRight => 0,
        }
    }

    /// Returns the canonical wire/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Unmute => "unmute",
            Self::CarouselLeft => "carousel_left",
            Self::CarouselRight => "carousel_right",
        }
    }

    /// Convert from the canonical wire name.
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "view" => Some(Self::View),
            "play" => Some(Self::Play),
            "pause" => Some(Self::Pause),
            "unmute" => Some(Self::Unmute),
            "carousel_left" => Some(Self::CarouselLeft),
            "carousel_right" => Some(Self::CarouselRight),
            _ => None,
        }
    }

    /// Return all actions in declaration order.
    pub fn all() -> &'static [Self] {
        &[
            Self::View,
            Self::Play,
            Self::Pause,
            Self::Unmute,
            Self::CarouselLeft,
            Self::CarouselRight,
        ]
    }
}

/// One recorded user interaction on a post. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub post_id: String,
    pub user_id: String,
    pub action: Action,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Creates a new event. No validation happens here; the receiver
    /// rejects malformed messages before they become events.
    pub fn new(
        post_id: impl Into<String>,
        user_id: impl Into<String>,
        action: Action,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            user_id: user_id.into(),
            action,
            created_at,
        }
    }

    /// Scoring weight contributed by this event.
    pub fn score(&self) -> i64 {
        self.action.weight()
    }
}
