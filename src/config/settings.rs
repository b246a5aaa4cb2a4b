//! User preference management with XDG Base Directory compliance.
//!
//! This module provides user settings management with proper XDG directory
//! usage for config and cache files, and a debounced background save.

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use {
    parking_lot::{Mutex, RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tokio::{spawn, task::JoinHandle, time::sleep},
    tracing::{debug, warn},
};

use crate::audio::{artwork_cache::DEFAULT_ARTWORK_CACHE_CAPACITY, queue::RepeatMode};

/// Application directory name under the XDG base directories.
pub const APP_DIR_NAME: &str = "sonance";

/// Delay between the last change and the debounced save.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(500);

/// Accepted output buffer durations in milliseconds.
const BUFFER_DURATION_RANGE_MS: std::ops::RangeInclusive<u32> = 10..=2000;

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable user settings structure with default values.
///
/// Missing fields take their default, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Linear volume slider value in [0, 1].
    pub volume: f32,
    /// Queue repeat mode.
    pub repeat_mode: RepeatMode,
    /// Whether the queue is shuffled.
    pub shuffle: bool,
    /// Music library folders.
    pub library_folders: Vec<String>,
    /// Audio output device name.
    pub audio_device: Option<String>,
    /// Buffer duration in milliseconds.
    pub buffer_duration_ms: u32,
    /// Whether the spectrum visualizer runs during playback.
    pub spectrum_enabled: bool,
    /// Number of artwork entries kept in memory.
    pub artwork_cache_capacity: usize,
    /// `tracing` filter directive overriding the default log level.
    pub log_filter: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            volume: 0.7,
            repeat_mode: RepeatMode::Off,
            shuffle: false,
            library_folders: vec![],
            audio_device: None,
            buffer_duration_ms: 50,
            spectrum_enabled: true,
            artwork_cache_capacity: DEFAULT_ARTWORK_CACHE_CAPACITY,
            log_filter: None,
        }
    }
}

impl UserSettings {
    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.volume.is_finite() || !(0.0..=1.0).contains(&self.volume) {
            return Err(SettingsError::InvalidValue {
                reason: format!("volume {} is outside 0.0..=1.0", self.volume),
            });
        }
        if !BUFFER_DURATION_RANGE_MS.contains(&self.buffer_duration_ms) {
            return Err(SettingsError::InvalidValue {
                reason: format!(
                    "buffer_duration_ms {} is outside {}..={}",
                    self.buffer_duration_ms,
                    BUFFER_DURATION_RANGE_MS.start(),
                    BUFFER_DURATION_RANGE_MS.end()
                ),
            });
        }
        if self.artwork_cache_capacity == 0 {
            return Err(SettingsError::InvalidValue {
                reason: "artwork_cache_capacity must be at least 1".to_string(),
            });
        }
        if self.library_folders.iter().any(|folder| folder.trim().is_empty()) {
            return Err(SettingsError::InvalidValue {
                reason: "library_folders contains an empty path".to_string(),
            });
        }
        Ok(())
    }
}

/// Handles loading, saving, and validation of user preferences.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe user settings storage.
    settings: RwLock<UserSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
    /// Delay used by `schedule_save`.
    save_delay: Duration,
    /// Pending debounced save, replaced by every `schedule_save`.
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

impl SettingsManager {
    /// Creates a new settings manager with default config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the config directory cannot be created.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a new settings manager with a custom config path.
    ///
    /// An unreadable or invalid file is logged and replaced by defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the config directory cannot be created.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        if let Some(parent) = config_path.parent() {
            create_dir_all(parent)?;
        }

        let settings = if config_path.exists() {
            debug!("Loading settings from existing file: {:?}", config_path);
            match Self::load(&config_path) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Ignoring settings file {}: {e}", config_path.display());
                    UserSettings::default()
                }
            }
        } else {
            debug!("No settings file at {:?}, using defaults", config_path);
            UserSettings::default()
        };

        Ok(SettingsManager {
            settings: RwLock::new(settings),
            config_path,
            save_delay: DEFAULT_SAVE_DELAY,
            pending_save: Mutex::new(None),
        })
    }

    /// Overrides the debounce delay.
    #[must_use]
    pub fn with_save_delay(mut self, save_delay: Duration) -> Self {
        self.save_delay = save_delay;
        self
    }

    fn load(path: &PathBuf) -> Result<UserSettings, SettingsError> {
        let contents = read_to_string(path)?;
        let settings: UserSettings = from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Replaces the settings and saves them to disk immediately.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the settings are invalid or cannot be saved.
    pub fn update_settings(&self, new_settings: UserSettings) -> Result<(), SettingsError> {
        new_settings.validate()?;
        *self.settings.write() = new_settings;
        self.save_settings()
    }

    /// Applies an in-memory change without saving.
    ///
    /// The change is rolled back if it produces invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` if the result does not validate.
    pub fn modify<F>(&self, change: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut settings = self.settings.write();
        let mut updated = settings.clone();
        change(&mut updated);
        updated.validate()?;
        *settings = updated;
        Ok(())
    }

    /// Saves after the debounce delay, cancelling any save still pending.
    ///
    /// Must be called inside a tokio runtime.
    pub fn schedule_save(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let delay = self.save_delay;
        let task = spawn(async move {
            sleep(delay).await;
            if let Err(e) = manager.save_settings() {
                warn!("Debounced settings save failed: {e}");
            }
        });

        if let Some(previous) = self.pending_save.lock().replace(task) {
            previous.abort();
        }
    }

    /// Whether a debounced save is waiting to run.
    pub fn has_pending_save(&self) -> bool {
        self.pending_save
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancels any pending save and writes the settings now.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be saved to disk.
    pub fn flush(&self) -> Result<(), SettingsError> {
        if let Some(pending) = self.pending_save.lock().take() {
            pending.abort();
        }
        self.save_settings()
    }

    fn save_settings(&self) -> Result<(), SettingsError> {
        debug!("Saving settings to file: {:?}", self.config_path);
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Ensures proper XDG directory usage for config and cache files.
///
/// # Returns
///
/// The path to the configuration file.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push(APP_DIR_NAME);
    config_dir.push("settings.json");
    config_dir
}

/// Gets the library database path.
#[must_use]
pub fn get_database_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push(APP_DIR_NAME);
    config_dir.push("library.db");
    config_dir
}

/// Gets the cache directory path.
#[must_use]
pub fn get_cache_dir() -> PathBuf {
    let mut cache_dir = get_xdg_cache_home();
    cache_dir.push(APP_DIR_NAME);
    cache_dir
}

/// Gets the directory holding rotated log files.
#[must_use]
pub fn get_log_dir() -> PathBuf {
    get_cache_dir().join("logs")
}

/// Gets the XDG config home directory following XDG Base Directory specification.
///
/// Uses `XDG_CONFIG_HOME` environment variable if set, otherwise defaults to $HOME/.config
fn get_xdg_config_home() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Gets the XDG cache home directory following XDG Base Directory specification.
///
/// Uses `XDG_CACHE_HOME` environment variable if set, otherwise defaults to $HOME/.cache
fn get_xdg_cache_home() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", ".cache")
}

fn xdg_dir(variable: &str, home_fallback: &str) -> PathBuf {
    if let Ok(dir) = var(variable)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }

    if let Ok(home) = var("HOME") {
        return PathBuf::from(home).join(home_fallback);
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{read_to_string, write},
        io::{Error, ErrorKind::NotFound},
        sync::Arc,
        time::Duration,
    };

    use {
        serde_json::{from_str, to_string},
        tempfile::tempdir,
        tokio::time::sleep,
    };

    use crate::{
        audio::queue::RepeatMode,
        config::settings::{SettingsError, SettingsManager, UserSettings},
    };

    #[test]
    fn test_user_settings_default() {
        let settings = UserSettings::default();
        assert_eq!(settings.volume, 0.7);
        assert_eq!(settings.repeat_mode, RepeatMode::Off);
        assert!(!settings.shuffle);
        assert_eq!(settings.buffer_duration_ms, 50);
        assert!(settings.spectrum_enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_user_settings_serialization() {
        let settings = UserSettings {
            volume: 0.4,
            repeat_mode: RepeatMode::All,
            shuffle: true,
            library_folders: vec!["/music".to_string()],
            audio_device: Some("Test Device".to_string()),
            buffer_duration_ms: 100,
            spectrum_enabled: false,
            artwork_cache_capacity: 8,
            log_filter: Some("sonance=debug".to_string()),
        };

        let serialized = to_string(&settings).unwrap();
        let deserialized: UserSettings = from_str(&serialized).unwrap();
        assert_eq!(settings, deserialized);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: UserSettings = from_str(r#"{"volume": 0.3}"#).unwrap();
        assert_eq!(settings.volume, 0.3);
        assert_eq!(settings.buffer_duration_ms, 50);
        assert!(settings.library_folders.is_empty());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let loud = UserSettings {
            volume: 1.5,
            ..UserSettings::default()
        };
        assert!(matches!(
            loud.validate(),
            Err(SettingsError::InvalidValue { .. })
        ));

        let tiny_buffer = UserSettings {
            buffer_duration_ms: 1,
            ..UserSettings::default()
        };
        assert!(tiny_buffer.validate().is_err());

        let no_cache = UserSettings {
            artwork_cache_capacity: 0,
            ..UserSettings::default()
        };
        assert!(no_cache.validate().is_err());
    }

    #[test]
    fn test_settings_error_display() {
        let io_error = Error::new(NotFound, "File not found");
        let settings_error = SettingsError::IoError(io_error);
        assert!(settings_error.to_string().contains("IO error"));

        let invalid_value_error = SettingsError::InvalidValue {
            reason: "test reason".to_string(),
        };
        assert_eq!(
            invalid_value_error.to_string(),
            "Invalid settings value: test reason"
        );
    }

    #[test]
    fn test_update_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sonance").join("settings.json");

        let manager = SettingsManager::with_config_path(path.clone()).unwrap();
        let mut settings = manager.get_settings().clone();
        settings.volume = 0.25;
        settings.library_folders = vec!["/music".to_string()];
        manager.update_settings(settings).unwrap();

        let reloaded = SettingsManager::with_config_path(path).unwrap();
        assert_eq!(reloaded.get_settings().volume, 0.25);
        assert_eq!(reloaded.get_settings().library_folders, vec!["/music"]);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write(&path, "{ not json").unwrap();

        let manager = SettingsManager::with_config_path(path).unwrap();
        assert_eq!(*manager.get_settings(), UserSettings::default());
    }

    #[test]
    fn test_modify_rolls_back_invalid_change() {
        let dir = tempdir().unwrap();
        let manager = SettingsManager::with_config_path(dir.path().join("settings.json")).unwrap();

        assert!(manager.modify(|s| s.volume = 2.0).is_err());
        assert_eq!(manager.get_settings().volume, 0.7);

        manager.modify(|s| s.shuffle = true).unwrap();
        assert!(manager.get_settings().shuffle);
    }

    #[tokio::test]
    async fn test_schedule_save_debounces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let manager = Arc::new(
            SettingsManager::with_config_path(path.clone())
                .unwrap()
                .with_save_delay(Duration::from_millis(50)),
        );

        for step in 1..=5 {
            manager.modify(|s| s.volume = step as f32 / 10.0).unwrap();
            manager.schedule_save();
            sleep(Duration::from_millis(10)).await;
        }

        // Every schedule restarted the delay, so nothing is written yet.
        assert!(!path.exists());
        assert!(manager.has_pending_save());

        sleep(Duration::from_millis(150)).await;
        let saved: UserSettings = from_str(&read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.volume, 0.5);
        assert!(!manager.has_pending_save());
    }

    #[tokio::test]
    async fn test_flush_cancels_pending_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let manager = Arc::new(SettingsManager::with_config_path(path.clone()).unwrap());

        manager.modify(|s| s.shuffle = true).unwrap();
        manager.schedule_save();
        manager.flush().unwrap();

        assert!(!manager.has_pending_save());
        let saved: UserSettings = from_str(&read_to_string(&path).unwrap()).unwrap();
        assert!(saved.shuffle);
    }
}
