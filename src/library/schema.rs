//! Database schema definition and versioning for the music library.
//!
//! This module defines the SQLite tables for artists, albums, folders, songs
//! and playlists, and records the schema version for future migrations.

use std::path::Path;

use {
    sqlx::{
        Error as SqlxError, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    },
    thiserror::Error,
    tracing::{debug, info},
};

/// Error type for schema operations.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] SqlxError),
    /// Schema migration error.
    #[error("Schema migration error: {reason}")]
    MigrationError { reason: String },
}

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE artists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE albums (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        artist_id INTEGER NOT NULL,
        FOREIGN KEY (artist_id) REFERENCES artists (id) ON DELETE CASCADE,
        UNIQUE (title, artist_id)
    )
    "#,
    r#"
    CREATE TABLE folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        added_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE songs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        artist_id INTEGER NOT NULL,
        album_id INTEGER NOT NULL,
        folder_id INTEGER NOT NULL,
        genre TEXT,
        track_number INTEGER,
        disc_number INTEGER,
        year INTEGER,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        file_size INTEGER NOT NULL DEFAULT 0,
        modified_at INTEGER,
        FOREIGN KEY (artist_id) REFERENCES artists (id) ON DELETE CASCADE,
        FOREIGN KEY (album_id) REFERENCES albums (id) ON DELETE CASCADE,
        FOREIGN KEY (folder_id) REFERENCES folders (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE playlist_songs (
        playlist_id INTEGER NOT NULL,
        song_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (playlist_id, position),
        FOREIGN KEY (playlist_id) REFERENCES playlists (id) ON DELETE CASCADE,
        FOREIGN KEY (song_id) REFERENCES songs (id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX idx_albums_artist_id ON albums (artist_id)",
    "CREATE INDEX idx_songs_folder_id ON songs (folder_id)",
    "CREATE INDEX idx_songs_album_id ON songs (album_id)",
    "CREATE INDEX idx_songs_artist_id ON songs (artist_id)",
    "CREATE INDEX idx_playlist_songs_song_id ON playlist_songs (song_id)",
];

/// Database schema definition.
pub struct SchemaManager {
    pool: SqlitePool,
}

impl SchemaManager {
    /// Creates a new schema manager.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initializes the database schema.
    ///
    /// A fresh database gets every table and the current version; an
    /// up-to-date one is left alone.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if table creation fails or the stored version
    /// cannot be migrated.
    pub async fn initialize_schema(&self) -> Result<(), SchemaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        match self.stored_version().await? {
            None => {
                info!("Creating library schema version {CURRENT_SCHEMA_VERSION}");
                self.create_tables().await?;
            }
            Some(version) if version == CURRENT_SCHEMA_VERSION => {
                debug!("Library schema is up to date");
            }
            Some(version) => {
                return Err(SchemaError::MigrationError {
                    reason: format!(
                        "no migration from version {version} to {CURRENT_SCHEMA_VERSION}"
                    ),
                });
            }
        }

        Ok(())
    }

    /// Creates all tables and records the version in one transaction.
    async fn create_tables(&self) -> Result<(), SchemaError> {
        let mut tx = self.pool.begin().await?;
        for statement in CREATE_TABLES {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(CURRENT_SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stored_version(&self) -> Result<Option<i32>, SchemaError> {
        Ok(
            sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Gets the current schema version, or 0 if not initialized.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the version table cannot be read.
    pub async fn get_current_version(&self) -> Result<i32, SchemaError> {
        Ok(self.stored_version().await?.unwrap_or(0))
    }
}

/// Creates a connection pool for the database file at `path`.
///
/// Parent directories and the file are created when missing.
///
/// # Errors
///
/// Returns `SchemaError` if the directory or the pool cannot be created.
pub async fn create_connection_pool(path: &Path) -> Result<SqlitePool, SchemaError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| SchemaError::MigrationError {
            reason: format!("cannot create {}: {e}", parent.display()),
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    Ok(SqlitePool::connect_with(options).await?)
}

/// Creates a pool over a private in-memory database.
///
/// Holds exactly one connection that never expires; each new connection
/// would open its own empty database.
///
/// # Errors
///
/// Returns `SchemaError` if the pool cannot be created.
pub async fn create_memory_pool() -> Result<SqlitePool, SchemaError> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::library::schema::{
        CURRENT_SCHEMA_VERSION, SchemaError, SchemaManager, create_connection_pool,
        create_memory_pool,
    };

    #[test]
    fn test_schema_error_display() {
        let migration_error = SchemaError::MigrationError {
            reason: "test error".to_string(),
        };
        assert_eq!(
            migration_error.to_string(),
            "Schema migration error: test error"
        );
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = create_memory_pool().await.unwrap();
        let manager = SchemaManager::new(pool.clone());
        assert_eq!(manager.get_current_version().await.unwrap_or(0), 0);

        manager.initialize_schema().await.unwrap();
        manager.initialize_schema().await.unwrap();
        assert_eq!(
            manager.get_current_version().await.unwrap(),
            CURRENT_SCHEMA_VERSION
        );

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "albums",
                "artists",
                "folders",
                "playlist_songs",
                "playlists",
                "schema_version",
                "songs"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let pool = create_memory_pool().await.unwrap();
        sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (99)")
            .execute(&pool)
            .await
            .unwrap();

        let result = SchemaManager::new(pool).initialize_schema().await;
        assert!(matches!(result, Err(SchemaError::MigrationError { .. })));
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("library.db");
        let pool = create_connection_pool(&path).await.unwrap();
        SchemaManager::new(pool).initialize_schema().await.unwrap();
        assert!(path.exists());
    }
}
