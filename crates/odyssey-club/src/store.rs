//! Flat-file persistence for the three club collections.
//!
//! Every read re-parses the backing file; a missing or corrupt file reads as
//! an empty collection. Writes fully overwrite the file with pretty-printed
//! JSON. There is no locking: concurrent writers race, last writer wins.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use odyssey_core::write_text_atomic;

use crate::records::{Album, BacklogAlbum, Rating};

pub const ALBUMS_FILE: &str = "albums.json";
pub const RATINGS_FILE: &str = "ratings.json";
pub const BACKLOG_FILE: &str = "backlog.json";

/// Handle on a data directory holding the three collection files.
#[derive(Debug, Clone)]
pub struct ClubStore {
    data_dir: PathBuf,
}

impl ClubStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn read_albums(&self) -> Vec<Album> {
        self.read_collection(ALBUMS_FILE)
    }

    pub fn read_ratings(&self) -> Vec<Rating> {
        self.read_collection(RATINGS_FILE)
    }

    pub fn read_backlog(&self) -> Vec<BacklogAlbum> {
        self.read_collection(BACKLOG_FILE)
    }

    pub fn write_albums(&self, albums: &[Album]) -> Result<()> {
        self.write_collection(ALBUMS_FILE, albums)
    }

    pub fn write_ratings(&self, ratings: &[Rating]) -> Result<()> {
        self.write_collection(RATINGS_FILE, ratings)
    }

    pub fn write_backlog(&self, backlog: &[BacklogAlbum]) -> Result<()> {
        self.write_collection(BACKLOG_FILE, backlog)
    }

    fn collection_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    fn read_collection<T: DeserializeOwned>(&self, file_name: &str) -> Vec<T> {
        let path = self.collection_path(file_name);
        if !path.exists() {
            return Vec::new();
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "failed to read collection; treating as empty"
                );
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "failed to parse collection; treating as empty"
                );
                Vec::new()
            }
        }
    }

    fn write_collection<T: Serialize>(&self, file_name: &str, records: &[T]) -> Result<()> {
        let path = self.collection_path(file_name);
        let content = serde_json::to_string_pretty(records)
            .with_context(|| format!("failed to serialize {file_name}"))?;
        write_text_atomic(&path, &content)
    }
}
