use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::user::OwnerSummary;

pub const STREAM_KEY_LEN: usize = 32;
pub const DEFAULT_THUMBNAIL: &str = "default-thumbnail.jpg";

const STREAM_KEY_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Only present when the viewer owns the stream or is an admin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    pub is_live: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub thumbnail: String,
    pub category: StreamCategory,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<OwnerSummary>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Stream {
    pub fn redacted(mut self) -> Self {
        self.stream_key = None;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StreamCategory {
    AssemblySession,
    CommitteeMeeting,
    PublicHearing,
    SpecialEvent,
}

impl StreamCategory {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "assembly-session" => Some(Self::AssemblySession),
            "committee-meeting" => Some(Self::CommitteeMeeting),
            "public-hearing" => Some(Self::PublicHearing),
            "special-event" => Some(Self::SpecialEvent),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::AssemblySession => "assembly-session",
            Self::CommitteeMeeting => "committee-meeting",
            Self::PublicHearing => "public-hearing",
            Self::SpecialEvent => "special-event",
        }
    }
}

/// Lifecycle state of a stream, derived from its `is_live` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Idle,
    Live,
}

impl LiveState {
    pub fn of(stream: &Stream) -> Self {
        if stream.is_live {
            Self::Live
        } else {
            Self::Idle
        }
    }

    /// The `is_live` value a transition into this state must find in the row.
    pub fn required_is_live(self) -> bool {
        match self {
            Self::Live => false,
            Self::Idle => true,
        }
    }
}

pub fn generate_stream_key() -> String {
    let mut rng = rand::thread_rng();
    (0..STREAM_KEY_LEN)
        .map(|_| STREAM_KEY_ALPHABET[rng.gen_range(0..STREAM_KEY_ALPHABET.len())] as char)
        .collect()
}

/// Keys supplied by a client instead of generated ones.
pub fn is_acceptable_stream_key(key: &str) -> bool {
    (16..=64).contains(&key.len()) && key.bytes().all(|b| b.is_ascii_alphanumeric())
}
