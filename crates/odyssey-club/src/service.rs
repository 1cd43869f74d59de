//! Selection, aggregation, and promotion logic over the flat-file store.

use chrono::Utc;
use thiserror::Error;

use crate::records::{
    generate_record_id, Album, AlbumRatings, BacklogAlbum, CommentWithRating, CurrentWeekAlbum,
    Rating, RatingStats,
};
use crate::store::ClubStore;

/// Full ratings + albums collections for client-side joining.
#[derive(Debug, Clone)]
pub struct RatingsSnapshot {
    pub ratings: Vec<Rating>,
    pub albums: Vec<Album>,
}

/// Enumerates supported `PickNextAlbumError` values.
#[derive(Debug, Error)]
pub enum PickNextAlbumError {
    #[error("no unpicked album or nomination found")]
    NothingToPick,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Domain operations for the album club.
#[derive(Debug, Clone)]
pub struct ClubService {
    store: ClubStore,
}

impl ClubService {
    pub fn new(store: ClubStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ClubStore {
        &self.store
    }

    /// Resolves the entry currently open in the club.
    ///
    /// The most recently picked album competes with the newest nomination:
    /// the nomination wins when no album has ever been picked, or when it was
    /// created after the album's picked timestamp. Nominations carry no
    /// ratings yet, so callers suppress stats when `is_nomination` is set.
    pub fn current_week_album(&self) -> Option<CurrentWeekAlbum> {
        let albums = self.store.read_albums();
        let backlog = self.store.read_backlog();

        let current_album = albums
            .into_iter()
            .filter(|album| album.picked_at.is_some())
            .max_by_key(|album| album.picked_at);
        let latest_nomination = backlog.into_iter().next_back();

        match (current_album, latest_nomination) {
            (None, None) => None,
            (Some(album), None) => Some(CurrentWeekAlbum {
                album,
                is_nomination: false,
            }),
            (None, Some(nomination)) => Some(CurrentWeekAlbum {
                album: nomination.into(),
                is_nomination: true,
            }),
            (Some(album), Some(nomination)) => {
                let picked_ms = album
                    .picked_at
                    .and_then(|picked_at| u64::try_from(picked_at.timestamp_millis()).ok());
                let nominated_ms = nomination.creation_time_ms();
                match (picked_ms, nominated_ms) {
                    (Some(picked), Some(nominated)) if nominated > picked => {
                        Some(CurrentWeekAlbum {
                            album: nomination.into(),
                            is_nomination: true,
                        })
                    }
                    _ => Some(CurrentWeekAlbum {
                        album,
                        is_nomination: false,
                    }),
                }
            }
        }
    }

    /// Aggregated stats and commented ratings for one album.
    pub fn album_ratings(&self, album_id: &str) -> AlbumRatings {
        let ratings: Vec<Rating> = self
            .store
            .read_ratings()
            .into_iter()
            .filter(|rating| rating.album_id == album_id)
            .collect();

        let count = ratings.len();
        let avg = if count > 0 {
            let total: f64 = ratings.iter().map(|rating| f64::from(rating.score)).sum();
            Some(total / count as f64)
        } else {
            None
        };

        let comments = ratings
            .iter()
            .filter_map(|rating| {
                rating.comment_text().map(|comment| CommentWithRating {
                    user: rating.user.clone(),
                    comment: comment.to_string(),
                    score: rating.score,
                })
            })
            .collect();

        AlbumRatings {
            album_id: album_id.to_string(),
            avg,
            count,
            comments,
        }
    }

    /// Average + count only, for cards that do not show comments.
    pub fn album_rating_stats(&self, album_id: &str) -> RatingStats {
        let AlbumRatings { avg, count, .. } = self.album_ratings(album_id);
        RatingStats { avg, count }
    }

    /// Backlog in insertion order, optionally truncated to the first `limit`.
    pub fn backlog_albums(&self, limit: Option<usize>) -> Vec<BacklogAlbum> {
        let mut backlog = self.store.read_backlog();
        if let Some(limit) = limit {
            backlog.truncate(limit);
        }
        backlog
    }

    /// Full ratings and albums collections, unfiltered.
    pub fn all_ratings(&self) -> RatingsSnapshot {
        RatingsSnapshot {
            ratings: self.store.read_ratings(),
            albums: self.store.read_albums(),
        }
    }

    /// Appends a nomination to the backlog and persists it.
    pub fn add_nomination(&self, nomination: BacklogAlbum) -> anyhow::Result<()> {
        let mut backlog = self.store.read_backlog();
        backlog.push(nomination);
        self.store.write_backlog(&backlog)
    }

    /// Appends a rating and persists it.
    pub fn add_rating(&self, rating: Rating) -> anyhow::Result<()> {
        let mut ratings = self.store.read_ratings();
        ratings.push(rating);
        self.store.write_ratings(&ratings)
    }

    /// Promotes the next album: the first un-picked catalog entry, or the
    /// oldest nomination when the catalog is exhausted. Stamps `picked_at`
    /// with the current time and persists the affected collections.
    pub fn pick_next_album(&self) -> Result<Album, PickNextAlbumError> {
        let mut albums = self.store.read_albums();
        let mut backlog = self.store.read_backlog();

        if let Some(album) = albums.iter_mut().find(|album| album.picked_at.is_none()) {
            album.picked_at = Some(Utc::now());
            let picked = album.clone();
            self.store.write_albums(&albums)?;
            return Ok(picked);
        }

        if backlog.is_empty() {
            return Err(PickNextAlbumError::NothingToPick);
        }

        let nomination = backlog.remove(0);
        let mut promoted: Album = nomination.into();
        if promoted.id.trim().is_empty() {
            promoted.id = generate_record_id();
        }
        promoted.picked_at = Some(Utc::now());
        albums.push(promoted.clone());
        self.store.write_albums(&albums)?;
        self.store.write_backlog(&backlog)?;
        Ok(promoted)
    }
}
