//! Data models for the music library database.
//!
//! Row types for folders, songs, artists, albums and playlists, with serde
//! serialization for the view-model layer.

use {
    serde::{Deserialize, Serialize},
    sqlx::FromRow,
};

use crate::audio::metadata::AudioMetadata;

/// A library folder registered for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, Default)]
pub struct FolderRecord {
    /// Unique database ID.
    pub id: i64,
    /// Absolute folder path.
    pub path: String,
    /// Timestamp when the folder was added.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}

/// Represents a musical artist in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, Default)]
pub struct Artist {
    /// Unique database ID.
    pub id: i64,
    /// Artist name.
    pub name: String,
}

/// Represents a musical album in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, Default)]
pub struct Album {
    /// Unique database ID.
    pub id: i64,
    /// Album title.
    pub title: String,
    /// ID of the associated artist.
    pub artist_id: i64,
    /// Name of the associated artist.
    pub artist_name: String,
}

/// A song row joined with its artist name and album title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, Default)]
pub struct SongRecord {
    /// Unique database ID.
    pub id: i64,
    /// File system path to the audio file.
    pub path: String,
    /// Track title.
    pub title: String,
    /// ID of the associated artist.
    pub artist_id: i64,
    /// Artist name.
    pub artist: String,
    /// ID of the associated album.
    pub album_id: i64,
    /// Album title.
    pub album: String,
    /// ID of the folder the file was indexed from.
    pub folder_id: i64,
    /// Genre (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Track number within the album.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_number: Option<i64>,
    /// Disc number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<i64>,
    /// Release year.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    /// Duration in milliseconds.
    pub duration_ms: i64,
    /// File size in bytes.
    pub file_size: i64,
    /// File modification time in seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<i64>,
}

impl SongRecord {
    /// Converts the row into queue metadata. Artwork is loaded on demand.
    #[must_use]
    pub fn to_audio_metadata(&self) -> AudioMetadata {
        let to_u32 = |value: Option<i64>| value.and_then(|v| u32::try_from(v).ok());
        AudioMetadata {
            path: self.path.clone(),
            title: Some(self.title.clone()),
            artist: Some(self.artist.clone()),
            album: Some(self.album.clone()),
            album_artist: None,
            genre: self.genre.clone(),
            track_number: to_u32(self.track_number),
            disc_number: to_u32(self.disc_number),
            year: to_u32(self.year),
            duration_ms: u64::try_from(self.duration_ms).unwrap_or(0),
            artwork: None,
        }
    }
}

/// A user playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, Default)]
pub struct PlaylistRecord {
    /// Unique database ID.
    pub id: i64,
    /// Unique playlist name.
    pub name: String,
    /// Timestamp when the playlist was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Number of entries.
    pub song_count: i64,
}

/// One ordered playlist membership row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PlaylistEntry {
    /// Zero-based position within the playlist.
    pub position: i64,
    /// The song at that position.
    #[sqlx(flatten)]
    pub song: SongRecord,
}

/// A file read by the indexer, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScannedSong {
    /// Tags read from the file.
    pub metadata: AudioMetadata,
    /// File size in bytes.
    pub file_size: u64,
    /// File modification time in seconds since the Unix epoch.
    pub modified_at: Option<i64>,
}
