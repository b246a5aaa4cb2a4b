//! Library database interface using sqlx with SQLite.
//!
//! This module provides the main `LibraryDatabase` struct that handles
//! all database operations for the music library: folders, songs, artists,
//! albums and ordered playlists.

use std::{collections::HashMap, path::Path};

use {
    sqlx::{Error as SqlxError, Sqlite, SqlitePool, Transaction},
    tracing::{debug, info},
};

use crate::{
    audio::metadata::UNKNOWN_ALBUM,
    error::LibraryError,
    library::{
        models::{Album, Artist, FolderRecord, PlaylistEntry, PlaylistRecord, ScannedSong, SongRecord},
        schema::{SchemaManager, create_connection_pool, create_memory_pool},
    },
};

/// Columns selected for `SongRecord`, joined with artist and album names.
const SONG_SELECT: &str = r#"
    SELECT s.id, s.path, s.title, s.artist_id, ar.name AS artist,
           s.album_id, al.title AS album, s.folder_id, s.genre,
           s.track_number, s.disc_number, s.year, s.duration_ms,
           s.file_size, s.modified_at
    FROM songs s
    JOIN artists ar ON ar.id = s.artist_id
    JOIN albums al ON al.id = s.album_id
"#;

/// Default song ordering.
const SONG_ORDER: &str = "ORDER BY ar.name, al.title, COALESCE(s.disc_number, 1), COALESCE(s.track_number, 0), s.title";

type Result<T> = std::result::Result<T, LibraryError>;

fn is_unique_violation(error: &SqlxError) -> bool {
    matches!(error, SqlxError::Database(db) if db.is_unique_violation())
}

fn playlist_not_found(id: i64) -> LibraryError {
    LibraryError::NotFound {
        entity: "playlist".to_string(),
        id,
    }
}

/// Name to id caches kept for the span of one bulk insert.
#[derive(Default)]
struct IdCache {
    artists: HashMap<String, i64>,
    albums: HashMap<(String, i64), i64>,
}

impl IdCache {
    async fn artist_id(&mut self, tx: &mut Transaction<'_, Sqlite>, name: &str) -> Result<i64> {
        if let Some(&id) = self.artists.get(name) {
            return Ok(id);
        }

        sqlx::query("INSERT INTO artists (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&mut **tx)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM artists WHERE name = ?")
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;

        self.artists.insert(name.to_string(), id);
        Ok(id)
    }

    async fn album_id(
        &mut self,
        tx: &mut Transaction<'_, Sqlite>,
        title: &str,
        artist_id: i64,
    ) -> Result<i64> {
        let key = (title.to_string(), artist_id);
        if let Some(&id) = self.albums.get(&key) {
            return Ok(id);
        }

        sqlx::query(
            "INSERT INTO albums (title, artist_id) VALUES (?, ?) ON CONFLICT (title, artist_id) DO NOTHING",
        )
        .bind(title)
        .bind(artist_id)
        .execute(&mut **tx)
        .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM albums WHERE title = ? AND artist_id = ?")
            .bind(title)
            .bind(artist_id)
            .fetch_one(&mut **tx)
            .await?;

        self.albums.insert(key, id);
        Ok(id)
    }
}

/// Main library database interface.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct LibraryDatabase {
    pool: SqlitePool,
}

impl LibraryDatabase {
    /// Opens (or creates) the database file at `path` and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if database initialization fails.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pool = create_connection_pool(path.as_ref()).await?;
        Self::with_pool(pool).await
    }

    /// Creates a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if database initialization fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = create_memory_pool().await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        SchemaManager::new(pool.clone()).initialize_schema().await?;
        Ok(LibraryDatabase { pool })
    }

    // Folders

    /// Registers a folder, returning the existing row if already known.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the insert fails.
    pub async fn add_folder(&self, path: &str) -> Result<FolderRecord> {
        if path.trim().is_empty() {
            return Err(LibraryError::InvalidData {
                reason: "folder path is empty".to_string(),
            });
        }

        sqlx::query("INSERT INTO folders (path) VALUES (?) ON CONFLICT (path) DO NOTHING")
            .bind(path)
            .execute(&self.pool)
            .await?;

        let folder = sqlx::query_as::<_, FolderRecord>(
            "SELECT id, path, added_at FROM folders WHERE path = ?",
        )
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        Ok(folder)
    }

    /// Gets all registered folders ordered by path.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_folders(&self) -> Result<Vec<FolderRecord>> {
        Ok(sqlx::query_as::<_, FolderRecord>(
            "SELECT id, path, added_at FROM folders ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Looks up a folder by path.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_folder_by_path(&self, path: &str) -> Result<Option<FolderRecord>> {
        Ok(sqlx::query_as::<_, FolderRecord>(
            "SELECT id, path, added_at FROM folders WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Removes a folder with its songs and their playlist entries.
    ///
    /// Playlists are renumbered and orphaned albums and artists deleted.
    /// Returns whether the folder existed.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the deletion fails.
    pub async fn remove_folder(&self, path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM folders WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed > 0 {
            compact_all_playlists(&mut tx).await?;
            delete_orphans(&mut tx).await?;
        }
        tx.commit().await?;

        if removed > 0 {
            info!(folder = %path, "Removed library folder");
        }
        Ok(removed > 0)
    }

    // Songs

    /// Upserts a batch of scanned files into one folder in a single transaction.
    ///
    /// Rows are keyed by path, so rescans keep song ids and playlist entries.
    /// Returns the number of songs written.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if any statement fails; the batch is rolled back.
    pub async fn upsert_songs(&self, folder_id: i64, songs: &[ScannedSong]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut cache = IdCache::default();

        for song in songs {
            let metadata = &song.metadata;
            let artist = metadata.display_artist().to_string();
            let album_artist = metadata
                .album_artist
                .as_deref()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(&artist)
                .to_string();
            let album = metadata.album.as_deref().unwrap_or(UNKNOWN_ALBUM);

            let artist_id = cache.artist_id(&mut tx, &artist).await?;
            let album_artist_id = cache.artist_id(&mut tx, &album_artist).await?;
            let album_id = cache.album_id(&mut tx, album, album_artist_id).await?;

            sqlx::query(
                r#"
                INSERT INTO songs (path, title, artist_id, album_id, folder_id, genre,
                                   track_number, disc_number, year, duration_ms,
                                   file_size, modified_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (path) DO UPDATE SET
                    title = excluded.title,
                    artist_id = excluded.artist_id,
                    album_id = excluded.album_id,
                    folder_id = excluded.folder_id,
                    genre = excluded.genre,
                    track_number = excluded.track_number,
                    disc_number = excluded.disc_number,
                    year = excluded.year,
                    duration_ms = excluded.duration_ms,
                    file_size = excluded.file_size,
                    modified_at = excluded.modified_at
                "#,
            )
            .bind(&metadata.path)
            .bind(metadata.display_title())
            .bind(artist_id)
            .bind(album_id)
            .bind(folder_id)
            .bind(&metadata.genre)
            .bind(metadata.track_number.map(i64::from))
            .bind(metadata.disc_number.map(i64::from))
            .bind(metadata.year.map(i64::from))
            .bind(i64::try_from(metadata.duration_ms).unwrap_or(i64::MAX))
            .bind(i64::try_from(song.file_size).unwrap_or(i64::MAX))
            .bind(song.modified_at)
            .execute(&mut *tx)
            .await?;
        }

        // Retagged files can leave their previous album without songs.
        delete_orphans(&mut tx).await?;
        tx.commit().await?;

        debug!(folder_id, count = songs.len(), "Upserted song batch");
        Ok(songs.len())
    }

    /// Gets every song in the library.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_songs(&self) -> Result<Vec<SongRecord>> {
        let sql = format!("{SONG_SELECT} {SONG_ORDER}");
        Ok(sqlx::query_as::<_, SongRecord>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Gets the songs indexed from one folder.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_songs_in_folder(&self, folder_id: i64) -> Result<Vec<SongRecord>> {
        let sql = format!("{SONG_SELECT} WHERE s.folder_id = ? {SONG_ORDER}");
        Ok(sqlx::query_as::<_, SongRecord>(&sql)
            .bind(folder_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Looks up a song by file path.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_song_by_path(&self, path: &str) -> Result<Option<SongRecord>> {
        let sql = format!("{SONG_SELECT} WHERE s.path = ?");
        Ok(sqlx::query_as::<_, SongRecord>(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Gets all songs by one artist.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` if the artist does not exist.
    pub async fn get_songs_by_artist(&self, artist_id: i64) -> Result<Vec<SongRecord>> {
        self.ensure_exists("artists", "artist", artist_id).await?;
        let sql = format!("{SONG_SELECT} WHERE s.artist_id = ? {SONG_ORDER}");
        Ok(sqlx::query_as::<_, SongRecord>(&sql)
            .bind(artist_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Gets all songs on one album in disc and track order.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` if the album does not exist.
    pub async fn get_songs_by_album(&self, album_id: i64) -> Result<Vec<SongRecord>> {
        self.ensure_exists("albums", "album", album_id).await?;
        let sql = format!("{SONG_SELECT} WHERE s.album_id = ? {SONG_ORDER}");
        Ok(sqlx::query_as::<_, SongRecord>(&sql)
            .bind(album_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Finds songs whose title, artist or album contains `query`.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn search_songs(&self, query: &str) -> Result<Vec<SongRecord>> {
        let pattern = format!("%{}%", query.trim());
        let sql = format!(
            "{SONG_SELECT} WHERE s.title LIKE ?1 OR ar.name LIKE ?1 OR al.title LIKE ?1 {SONG_ORDER}"
        );
        Ok(sqlx::query_as::<_, SongRecord>(&sql)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Paths of the songs indexed from one folder.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_song_paths_in_folder(&self, folder_id: i64) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT path FROM songs WHERE folder_id = ? ORDER BY path")
                .bind(folder_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Removes one song. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the deletion fails.
    pub async fn remove_song(&self, path: &str) -> Result<bool> {
        Ok(self.remove_songs_by_paths(&[path.to_string()]).await? > 0)
    }

    /// Removes songs by path in one transaction, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if a deletion fails; nothing is removed then.
    pub async fn remove_songs_by_paths(&self, paths: &[String]) -> Result<u64> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for path in paths {
            removed += sqlx::query("DELETE FROM songs WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        if removed > 0 {
            compact_all_playlists(&mut tx).await?;
            delete_orphans(&mut tx).await?;
        }
        tx.commit().await?;

        debug!(removed, "Removed songs");
        Ok(removed)
    }

    // Artists and albums

    /// Gets all artists ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_artists(&self) -> Result<Vec<Artist>> {
        Ok(
            sqlx::query_as::<_, Artist>("SELECT id, name FROM artists ORDER BY name")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Gets all albums ordered by artist and title.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_albums(&self) -> Result<Vec<Album>> {
        Ok(sqlx::query_as::<_, Album>(
            r#"
            SELECT al.id, al.title, al.artist_id, ar.name AS artist_name
            FROM albums al
            JOIN artists ar ON ar.id = al.artist_id
            ORDER BY ar.name, al.title
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Deletes albums without songs and artists without songs or albums.
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the deletion fails.
    pub async fn cleanup_orphans(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = delete_orphans(&mut tx).await?;
        tx.commit().await?;
        Ok(removed)
    }

    // Playlists

    /// Creates an empty playlist.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::DuplicateName` if the name is taken.
    pub async fn create_playlist(&self, name: &str) -> Result<PlaylistRecord> {
        let name = validate_playlist_name(name)?;
        let id = sqlx::query("INSERT INTO playlists (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_or(e, name))?
            .last_insert_rowid();

        info!(playlist = %name, "Created playlist");
        self.get_playlist(id).await
    }

    /// Renames a playlist.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` for an unknown id and
    /// `LibraryError::DuplicateName` if the name is taken.
    pub async fn rename_playlist(&self, id: i64, name: &str) -> Result<()> {
        let name = validate_playlist_name(name)?;
        let updated = sqlx::query("UPDATE playlists SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_or(e, name))?
            .rows_affected();

        if updated == 0 {
            return Err(playlist_not_found(id));
        }
        Ok(())
    }

    /// Deletes a playlist and its entries.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` for an unknown id.
    pub async fn delete_playlist(&self, id: i64) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM playlists WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(playlist_not_found(id));
        }
        Ok(())
    }

    /// Gets one playlist with its entry count.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` for an unknown id.
    pub async fn get_playlist(&self, id: i64) -> Result<PlaylistRecord> {
        sqlx::query_as::<_, PlaylistRecord>(
            r#"
            SELECT p.id, p.name, p.created_at, COUNT(ps.song_id) AS song_count
            FROM playlists p
            LEFT JOIN playlist_songs ps ON ps.playlist_id = p.id
            WHERE p.id = ?
            GROUP BY p.id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| playlist_not_found(id))
    }

    /// Gets all playlists ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the query fails.
    pub async fn get_playlists(&self) -> Result<Vec<PlaylistRecord>> {
        Ok(sqlx::query_as::<_, PlaylistRecord>(
            r#"
            SELECT p.id, p.name, p.created_at, COUNT(ps.song_id) AS song_count
            FROM playlists p
            LEFT JOIN playlist_songs ps ON ps.playlist_id = p.id
            GROUP BY p.id
            ORDER BY p.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Appends a song to a playlist, returning its position.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` if the playlist or song is unknown.
    pub async fn add_to_playlist(&self, playlist_id: i64, song_id: i64) -> Result<i64> {
        self.ensure_exists("playlists", "playlist", playlist_id)
            .await?;
        self.ensure_exists("songs", "song", song_id).await?;

        let mut tx = self.pool.begin().await?;
        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_songs WHERE playlist_id = ?",
        )
        .bind(playlist_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO playlist_songs (playlist_id, song_id, position) VALUES (?, ?, ?)")
            .bind(playlist_id)
            .bind(song_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(position)
    }

    /// Removes the entry at `position`; later entries move up by one.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` if there is no such entry.
    pub async fn remove_from_playlist(&self, playlist_id: i64, position: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut song_ids = playlist_song_ids(&mut tx, playlist_id).await?;

        let index = usize::try_from(position)
            .ok()
            .filter(|&index| index < song_ids.len())
            .ok_or_else(|| LibraryError::NotFound {
                entity: "playlist entry".to_string(),
                id: position,
            })?;
        song_ids.remove(index);

        write_playlist(&mut tx, playlist_id, &song_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Moves the entry at `from` to `to`, shifting the entries in between.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::InvalidData` if either position is out of range.
    pub async fn move_in_playlist(&self, playlist_id: i64, from: i64, to: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut song_ids = playlist_song_ids(&mut tx, playlist_id).await?;

        let in_range = |value: i64| usize::try_from(value).ok().filter(|&i| i < song_ids.len());
        let (Some(from_index), Some(to_index)) = (in_range(from), in_range(to)) else {
            return Err(LibraryError::InvalidData {
                reason: format!(
                    "cannot move {from} to {to} in a playlist of {} songs",
                    song_ids.len()
                ),
            });
        };

        if from_index != to_index {
            let song_id = song_ids.remove(from_index);
            song_ids.insert(to_index, song_id);
            write_playlist(&mut tx, playlist_id, &song_ids).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Gets a playlist's songs in order.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` for an unknown playlist.
    pub async fn get_playlist_songs(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>> {
        self.ensure_exists("playlists", "playlist", playlist_id)
            .await?;
        let sql = format!(
            r#"
            SELECT ps.position, song.*
            FROM playlist_songs ps
            JOIN ({SONG_SELECT}) song ON song.id = ps.song_id
            WHERE ps.playlist_id = ?
            ORDER BY ps.position
            "#
        );
        Ok(sqlx::query_as::<_, PlaylistEntry>(&sql)
            .bind(playlist_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn ensure_exists(&self, table: &str, entity: &str, id: i64) -> Result<()> {
        let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
        let exists: Option<i64> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => Ok(()),
            None => Err(LibraryError::NotFound {
                entity: entity.to_string(),
                id,
            }),
        }
    }
}

fn validate_playlist_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::InvalidData {
            reason: "playlist name is empty".to_string(),
        });
    }
    Ok(trimmed)
}

fn duplicate_or(error: SqlxError, name: &str) -> LibraryError {
    if is_unique_violation(&error) {
        LibraryError::DuplicateName {
            entity: "Playlist".to_string(),
            name: name.to_string(),
        }
    } else {
        LibraryError::DatabaseError(error)
    }
}

async fn playlist_song_ids(tx: &mut Transaction<'_, Sqlite>, playlist_id: i64) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT song_id FROM playlist_songs WHERE playlist_id = ? ORDER BY position",
    )
    .bind(playlist_id)
    .fetch_all(&mut **tx)
    .await?)
}

/// Rewrites a playlist's rows with positions `0..song_ids.len()`.
async fn write_playlist(
    tx: &mut Transaction<'_, Sqlite>,
    playlist_id: i64,
    song_ids: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM playlist_songs WHERE playlist_id = ?")
        .bind(playlist_id)
        .execute(&mut **tx)
        .await?;

    for (position, song_id) in song_ids.iter().enumerate() {
        sqlx::query("INSERT INTO playlist_songs (playlist_id, song_id, position) VALUES (?, ?, ?)")
            .bind(playlist_id)
            .bind(song_id)
            .bind(position as i64)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Closes position gaps left by cascaded song deletions.
async fn compact_all_playlists(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let gapped: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT playlist_id FROM playlist_songs
        GROUP BY playlist_id
        HAVING MAX(position) + 1 != COUNT(*)
        "#,
    )
    .fetch_all(&mut **tx)
    .await?;

    for playlist_id in gapped {
        let song_ids = playlist_song_ids(tx, playlist_id).await?;
        write_playlist(tx, playlist_id, &song_ids).await?;
    }
    Ok(())
}

async fn delete_orphans(tx: &mut Transaction<'_, Sqlite>) -> Result<u64> {
    let albums = sqlx::query("DELETE FROM albums WHERE id NOT IN (SELECT album_id FROM songs)")
        .execute(&mut **tx)
        .await?
        .rows_affected();
    let artists = sqlx::query(
        r#"
        DELETE FROM artists
        WHERE id NOT IN (SELECT artist_id FROM songs)
          AND id NOT IN (SELECT artist_id FROM albums)
        "#,
    )
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if albums + artists > 0 {
        debug!(albums, artists, "Deleted orphaned rows");
    }
    Ok(albums + artists)
}
