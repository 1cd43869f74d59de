//! Record shapes persisted in the club's flat files.
//!
//! Field names serialize in camelCase so data files written by earlier
//! deployments load unchanged. Every record carries an explicit `createdAt`
//! stamp; the millisecond timestamp embedded in generated identifiers is
//! kept only as a fallback for records that predate the field.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use odyssey_core::current_unix_timestamp_ms;

/// A catalog album. `picked_at` is set exactly once, on promotion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A nomination awaiting promotion. Never carries a picked timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BacklogAlbum {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl BacklogAlbum {
    /// Creation time in unix millis: explicit stamp first, id fallback second.
    pub fn creation_time_ms(&self) -> Option<u64> {
        if let Some(created_at) = self.created_at {
            return u64::try_from(created_at.timestamp_millis()).ok();
        }
        embedded_id_millis(&self.id)
    }
}

impl From<BacklogAlbum> for Album {
    fn from(nomination: BacklogAlbum) -> Self {
        Self {
            id: nomination.id,
            title: nomination.title,
            artist: nomination.artist,
            genre: nomination.genre,
            cover_url: nomination.cover_url,
            picked_at: None,
            created_at: nomination.created_at,
        }
    }
}

/// One user's score for an album. Ratings are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub album_id: String,
    pub user: String,
    pub score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Rating {
    /// Returns the comment when present and non-empty.
    pub fn comment_text(&self) -> Option<&str> {
        self.comment.as_deref().filter(|text| !text.is_empty())
    }
}

/// A commented rating projected for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentWithRating {
    pub user: String,
    pub comment: String,
    pub score: u8,
}

/// Average + count for one album. `avg` is unset when no ratings exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    pub avg: Option<f64>,
    pub count: usize,
}

/// Aggregated ratings view for one album.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlbumRatings {
    pub album_id: String,
    pub avg: Option<f64>,
    pub count: usize,
    pub comments: Vec<CommentWithRating>,
}

/// The entry currently open in the club: a picked album or a fresh nomination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentWeekAlbum {
    pub album: Album,
    pub is_nomination: bool,
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a record identifier in the `id_<millis>_<suffix>` form.
pub fn generate_record_id() -> String {
    let millis = current_unix_timestamp_ms();
    let seed = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ millis.rotate_left(23);
    format!("id_{millis}_{}", base36_suffix(mixed))
}

fn base36_suffix(mut value: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = String::with_capacity(9);
    for _ in 0..9 {
        out.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    out
}

/// Extracts the millisecond timestamp embedded in a generated identifier.
pub fn embedded_id_millis(id: &str) -> Option<u64> {
    id.split('_').nth(1)?.parse().ok()
}
