//! Renderable view payloads returned by tools.
//!
//! A closed, `kind`-tagged set so the presentation layer can map each variant
//! to concrete UI without the core knowing anything about rendering.

use serde::{Deserialize, Serialize};

use odyssey_club::{Album, BacklogAlbum, CommentWithRating, Rating, RatingStats};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClubView {
    /// One album, with stats attached unless the entry is a nomination.
    AlbumCard {
        album: Album,
        is_nomination: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<RatingStats>,
    },
    /// Aggregated ratings for a single album.
    Stats {
        album_id: String,
        avg: Option<f64>,
        count: usize,
        comments: Vec<CommentWithRating>,
    },
    /// A grid of backlog nominations.
    AlbumGrid { albums: Vec<BacklogAlbum> },
    /// Prompt the client to present the nomination form, optionally pre-filled.
    NominationForm {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        artist: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        genre: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cover_url: Option<String>,
    },
    /// Prompt the client to present the rating form for the current album.
    RatingForm {
        album_id: String,
        album_title: String,
        album_artist: String,
    },
    /// Every rating joined against the catalog, for tabular display.
    RatingsTable {
        ratings: Vec<Rating>,
        albums: Vec<Album>,
    },
    /// Commented ratings joined against the catalog.
    CommentList {
        ratings: Vec<Rating>,
        albums: Vec<Album>,
    },
    /// A plain user-visible message.
    Notice { message: String },
}
