//! File system walking and metadata extraction for the library indexer.

use std::{
    fs::metadata,
    io::Error as IoError,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use {
    tokio::task::{JoinSet, spawn_blocking},
    tracing::{debug, warn},
    walkdir::WalkDir,
};

use crate::{
    audio::metadata::{TagReader, is_supported_audio_file},
    error::LibraryError,
    library::models::ScannedSong,
};

/// Recursively collects supported audio files below `root`, sorted by path.
///
/// Symlinks are followed; a link back into one of its own ancestors is
/// logged and not descended. Unreadable subdirectories are logged and
/// skipped.
///
/// # Errors
///
/// Returns `LibraryError::IoError` if `root` itself cannot be read.
pub fn collect_audio_files(root: &Path) -> Result<Vec<PathBuf>, LibraryError> {
    let mut audio_files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(IoError::from(e).into()),
            Err(e) if e.loop_ancestor().is_some() => {
                warn!("Skipping symlink loop: {e}");
                continue;
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };

        if entry.file_type().is_file() && is_supported_audio_file(entry.path()) {
            audio_files.push(entry.into_path());
        }
    }

    audio_files.sort();
    Ok(audio_files)
}

/// Reads tags and file attributes of one file.
///
/// # Errors
///
/// Returns `LibraryError` if the file cannot be stat'ed or its tags parsed.
pub fn read_scanned_song(path: &Path) -> Result<ScannedSong, LibraryError> {
    let attributes = metadata(path)?;
    let modified_at = attributes
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .and_then(|elapsed| i64::try_from(elapsed.as_secs()).ok());

    let metadata = TagReader::read_metadata(path).map_err(|e| LibraryError::InvalidData {
        reason: format!("{}: {e}", path.display()),
    })?;

    Ok(ScannedSong {
        metadata,
        file_size: attributes.len(),
        modified_at,
    })
}

/// Extracts metadata on blocking tasks, at most `max_concurrent` at a time.
///
/// Returns the readable songs sorted by path and the number of skipped files.
pub async fn read_scanned_files(paths: Vec<PathBuf>, max_concurrent: usize) -> (Vec<ScannedSong>, usize) {
    let max_concurrent = max_concurrent.max(1);
    let mut songs = Vec::with_capacity(paths.len());
    let mut skipped = 0;
    let mut tasks = JoinSet::new();
    let mut queued = paths.into_iter();

    loop {
        while tasks.len() < max_concurrent {
            let Some(path) = queued.next() else {
                break;
            };
            tasks.spawn(async move {
                spawn_blocking(move || read_scanned_song(&path))
                    .await
                    .map_err(|e| LibraryError::InvalidData {
                        reason: format!("metadata task failed: {e}"),
                    })?
            });
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok(Ok(song)) => songs.push(song),
            Ok(Err(e)) => {
                warn!("Skipping file: {e}");
                skipped += 1;
            }
            Err(e) => {
                warn!("Metadata task panicked: {e}");
                skipped += 1;
            }
        }
    }

    songs.sort_by(|a, b| a.metadata.path.cmp(&b.metadata.path));
    debug!(read = songs.len(), skipped, "Metadata extraction finished");
    (songs, skipped)
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, write};

    use tempfile::tempdir;

    use crate::{
        library::indexer::handlers::{collect_audio_files, read_scanned_files, read_scanned_song},
        test_support::write_wav,
    };

    #[test]
    fn test_collect_audio_files_recurses_and_filters() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("Artist").join("Album");
        create_dir_all(&nested).unwrap();
        write(nested.join("02.flac"), b"").unwrap();
        write(nested.join("01.mp3"), b"").unwrap();
        write(nested.join("cover.jpg"), b"").unwrap();
        write(dir.path().join("notes.txt"), b"").unwrap();

        let files = collect_audio_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["01.mp3", "02.flac"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_survives_symlink_cycle() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let album = dir.path().join("album");
        create_dir_all(&album).unwrap();
        write(album.join("song.flac"), b"").unwrap();
        symlink(dir.path(), album.join("loop")).unwrap();

        let files = collect_audio_files(dir.path()).unwrap();
        assert_eq!(files, vec![album.join("song.flac")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_follows_linked_folder() {
        use std::os::unix::fs::symlink;

        let library = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        write(elsewhere.path().join("linked.mp3"), b"").unwrap();
        symlink(elsewhere.path(), library.path().join("external")).unwrap();

        let files = collect_audio_files(library.path()).unwrap();
        assert_eq!(files, vec![library.path().join("external").join("linked.mp3")]);
    }

    #[test]
    fn test_collect_missing_root_is_error() {
        let dir = tempdir().unwrap();
        assert!(collect_audio_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_read_scanned_song_from_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 1, 16_000).unwrap();

        let song = read_scanned_song(&path).unwrap();
        assert_eq!(song.metadata.duration_ms, 2000);
        assert!(song.file_size > 44);
        assert!(song.modified_at.is_some());
    }

    #[tokio::test]
    async fn test_read_scanned_files_skips_unreadable() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.wav");
        let bad = dir.path().join("bad.flac");
        write_wav(&good, 8_000, 1, 800).unwrap();
        write(&bad, b"not audio").unwrap();

        let (songs, skipped) = read_scanned_files(vec![bad, good.clone()], 1).await;
        assert_eq!(skipped, 1);
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].metadata.path, good.to_string_lossy());
    }
}
