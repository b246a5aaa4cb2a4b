//! Audio file metadata extraction using the `lofty` crate.
//!
//! Produces the `AudioMetadata` record shared by the indexer, the play queue
//! and the view-model layer.

use std::path::Path;

use {
    lofty::{
        error::LoftyError,
        file::{AudioFile, TaggedFileExt},
        picture::PictureType::{CoverBack, CoverFront, Leaflet},
        prelude::Accessor,
        probe::Probe,
        tag::{ItemKey, Tag},
    },
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Artist name used when a file carries no artist tag.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Album name used when a file carries no album tag.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// File extensions the decoder and indexer accept.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "ogg", "opus", "m4a", "aac", "aiff", "aif", "wv", "ape",
];

/// Error type for metadata extraction operations.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Failed to read or parse the audio file.
    #[error("Failed to read audio file: {0}")]
    ReadError(#[from] LoftyError),
    /// The file format is not supported.
    #[error("Unsupported file format")]
    UnsupportedFormat,
}

/// Metadata for a single track, as read from its tags.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Path to the audio file.
    pub path: String,
    /// Track title.
    pub title: Option<String>,
    /// Track artist.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
    /// Album artist.
    pub album_artist: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Track number.
    pub track_number: Option<u32>,
    /// Disc number.
    pub disc_number: Option<u32>,
    /// Release year.
    pub year: Option<u32>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Embedded artwork data (if requested and available).
    #[serde(skip)]
    pub artwork: Option<Vec<u8>>,
}

impl AudioMetadata {
    /// Creates metadata that carries only a path, for files whose tags could
    /// not be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    /// Title for display, falling back to the file stem.
    #[must_use]
    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            Path::new(&self.path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| self.path.clone())
        })
    }

    /// Artist for display.
    #[must_use]
    pub fn display_artist(&self) -> &str {
        self.artist.as_deref().unwrap_or(UNKNOWN_ARTIST)
    }

    /// Album for display.
    #[must_use]
    pub fn display_album(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }
}

/// Checks whether a path carries one of the supported audio extensions.
#[must_use]
pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(ext))
        })
}

/// Reads tag metadata from audio files.
///
/// # Examples
///
/// ```no_run
/// use sonance::audio::metadata::TagReader;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let metadata = TagReader::read_metadata("/path/to/song.flac")?;
///     println!("Title: {}", metadata.display_title());
///     println!("Duration: {} ms", metadata.duration_ms);
///     Ok(())
/// }
/// ```
pub struct TagReader;

impl TagReader {
    /// Reads tags and duration without artwork.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError` if the file cannot be read or parsed.
    pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<AudioMetadata, MetadataError> {
        Self::read(path.as_ref(), false)
    }

    /// Reads tags, duration and embedded artwork.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError` if the file cannot be read or parsed.
    pub fn read_metadata_with_artwork<P: AsRef<Path>>(
        path: P,
    ) -> Result<AudioMetadata, MetadataError> {
        Self::read(path.as_ref(), true)
    }

    /// Reads only the embedded artwork of a file.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError` if the file cannot be read or parsed.
    pub fn read_artwork<P: AsRef<Path>>(path: P) -> Result<Option<Vec<u8>>, MetadataError> {
        let tagged_file = Probe::open(path.as_ref())?.read()?;
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
        Ok(tag.and_then(front_cover))
    }

    fn read(path: &Path, with_artwork: bool) -> Result<AudioMetadata, MetadataError> {
        if !is_supported_audio_file(path) {
            return Err(MetadataError::UnsupportedFormat);
        }

        let tagged_file = Probe::open(path)?.read()?;
        let duration_ms = u64::try_from(tagged_file.properties().duration().as_millis())
            .unwrap_or(u64::MAX);

        let mut metadata = AudioMetadata {
            duration_ms,
            ..AudioMetadata::from_path(path)
        };

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            metadata.title = non_empty(tag.title().map(|s| s.into_owned()));
            metadata.artist = non_empty(tag.artist().map(|s| s.into_owned()));
            metadata.album = non_empty(tag.album().map(|s| s.into_owned()));
            metadata.album_artist =
                non_empty(tag.get_string(ItemKey::AlbumArtist).map(str::to_string));
            metadata.genre = non_empty(tag.genre().map(|s| s.into_owned()));
            metadata.track_number = tag.track();
            metadata.disc_number = tag.disk();
            metadata.year = tag
                .get_string(ItemKey::Year)
                .or_else(|| tag.get_string(ItemKey::RecordingDate))
                .and_then(parse_year);
            if with_artwork {
                metadata.artwork = front_cover(tag);
            }
        }

        Ok(metadata)
    }
}

/// Picks the front cover, falling back to any other cover-like picture.
fn front_cover(tag: &Tag) -> Option<Vec<u8>> {
    tag.get_picture_type(CoverFront)
        .or_else(|| {
            tag.pictures()
                .iter()
                .find(|pic| matches!(pic.pic_type(), CoverBack | Leaflet))
        })
        .or_else(|| tag.pictures().first())
        .map(|pic| pic.data().to_vec())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts the leading four-digit year from values like `2011` or `2011-04-02`.
fn parse_year(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::audio::metadata::{
        AudioMetadata, MetadataError, TagReader, is_supported_audio_file, non_empty, parse_year,
    };

    #[test]
    fn test_metadata_error_display() {
        let error = MetadataError::UnsupportedFormat;
        assert_eq!(error.to_string(), "Unsupported file format");
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_audio_file(Path::new("/music/a.flac")));
        assert!(is_supported_audio_file(Path::new("/music/a.MP3")));
        assert!(!is_supported_audio_file(Path::new("/music/cover.jpg")));
        assert!(!is_supported_audio_file(Path::new("/music/README")));
    }

    #[test]
    fn test_display_fallbacks() {
        let metadata = AudioMetadata::from_path("/music/Artist/01 - Intro.flac");
        assert_eq!(metadata.display_title(), "01 - Intro");
        assert_eq!(metadata.display_artist(), "Unknown Artist");
        assert_eq!(metadata.display_album(), "Unknown Album");

        let tagged = AudioMetadata {
            title: Some("Intro".to_string()),
            artist: Some("Band".to_string()),
            ..metadata
        };
        assert_eq!(tagged.display_title(), "Intro");
        assert_eq!(tagged.display_artist(), "Band");
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1997"), Some(1997));
        assert_eq!(parse_year("2011-04-02"), Some(2011));
        assert_eq!(parse_year("97"), None);
        assert_eq!(parse_year(""), None);
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" Jazz ".to_string())), Some("Jazz".to_string()));
    }

    #[test]
    fn test_unsupported_file_is_rejected() {
        let result = TagReader::read_metadata("/tmp/not-audio.txt");
        assert!(matches!(result, Err(MetadataError::UnsupportedFormat)));
    }
}
