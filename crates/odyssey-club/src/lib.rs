//! Album club domain: record types, flat-file storage, and selection logic.

pub mod records;
pub mod service;
pub mod store;

pub use records::{
    embedded_id_millis, generate_record_id, Album, AlbumRatings, BacklogAlbum, CommentWithRating,
    CurrentWeekAlbum, Rating, RatingStats,
};
pub use service::{ClubService, PickNextAlbumError, RatingsSnapshot};
pub use store::ClubStore;
