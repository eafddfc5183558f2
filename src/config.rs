//! Configuration system using TOML files.
//!
//! Config is looked up in this order:
//! 1. `--config <path>` on the command line
//! 2. `$MUSIC_CURATOR_CONFIG`
//! 3. the OS-standard config directory:
//!    - Windows: %APPDATA%\music-curator\config.toml
//!    - macOS: ~/Library/Application Support/music-curator/config.toml
//!    - Linux: ~/.config/music-curator/config.toml
//!
//! A missing file yields defaults. Secrets can be supplied through the
//! environment instead of the file (see [`Config::apply_env`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub source: SourceConfig,
    pub spotify: SpotifyConfig,
    pub downloader: DownloaderConfig,
    pub tagger: TaggerConfig,
    pub lidarr: LidarrConfig,
    pub plex: PlexConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub scheduler: SchedulerConfig,
    pub verification: VerificationConfig,
    pub features: FeaturesConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// State store file (default: data dir / music_curator.db)
    pub database: Option<PathBuf>,
    /// Root of the per-entry download staging folders
    pub download_dir: PathBuf,
    /// Where derived .m3u playlists are written
    pub playlist_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: None,
            download_dir: PathBuf::from("/music/incoming"),
            playlist_dir: PathBuf::from("/music/Playlists"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for this crate when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Watched playlists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub playlists: Vec<WatchedPlaylist>,
}

/// One playlist to poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedPlaylist {
    /// Provider playlist id
    pub id: String,
    /// Display name, also used for derived playlists
    pub name: String,
}

/// Spotify credentials (client-credentials flow)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_url: String,
    pub token_url: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_url: "https://api.spotify.com/v1".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
        }
    }
}

/// External downloader and the acquisition queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Executable to run
    pub command: String,
    /// Arguments; `{uri}`, `{artist}`, `{title}`, `{output}` and `{format}`
    /// are substituted per entry
    pub args: Vec<String>,
    /// Requested audio format
    pub format: String,
    /// Simultaneous downloads (worker pool size)
    pub concurrency: usize,
    /// Attempts before a transient failure becomes terminal
    pub max_attempts: u32,
    /// Downloads per UTC day, 0 = unlimited
    pub daily_limit: u32,
    /// Exit codes meaning "track unobtainable"
    pub permanent_exit_codes: Vec<i32>,
    /// Lower bound of the pause between downloads
    pub delay_min_secs: f64,
    /// Upper bound of the pause between downloads
    pub delay_max_secs: f64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            command: "onthespot-cli".to_string(),
            args: vec![
                "--output".to_string(),
                "{output}".to_string(),
                "--format".to_string(),
                "{format}".to_string(),
                "{uri}".to_string(),
            ],
            format: "m4a".to_string(),
            concurrency: 2,
            max_attempts: 5,
            daily_limit: 75,
            permanent_exit_codes: vec![2],
            delay_min_secs: 3.0,
            delay_max_secs: 7.0,
        }
    }
}

/// Fingerprinting and tagging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// AcoustID API key (or set ACOUSTID_API_KEY)
    pub acoustid_api_key: Option<String>,
    /// Explicit fpcalc path; searched in common locations when unset
    pub fpcalc_path: Option<PathBuf>,
    /// Minimum AcoustID score to accept (0.0 - 1.0)
    pub min_confidence: f32,
    /// Attempts before a tool error becomes terminal
    pub max_attempts: u32,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            acoustid_api_key: None,
            fpcalc_path: None,
            min_confidence: 0.8,
            max_attempts: 3,
        }
    }
}

/// Lidarr (library manager)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarrConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Plex (media server)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlexConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    /// Music library section id
    pub section_id: Option<u32>,
}

/// Backoff and retry caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Attempts for import triggers and verification timeouts
    pub max_import_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 30,
            backoff_max_secs: 6 * 60 * 60,
            max_import_attempts: 5,
        }
    }
}

/// Upper bounds on blocking external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Library manager, media server and playlist provider calls
    pub external_call_secs: u64,
    pub download_secs: u64,
    pub identify_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            external_call_secs: 30,
            download_secs: 15 * 60,
            identify_secs: 120,
        }
    }
}

/// Interval of each scheduler pass, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_secs: u64,
    pub precheck_secs: u64,
    pub resume_secs: u64,
    pub identify_secs: u64,
    pub import_secs: u64,
    pub verify_secs: u64,
    pub playlists_secs: u64,
    /// How often an idle download worker looks for work
    pub worker_idle_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_secs: 15 * 60,
            precheck_secs: 60,
            resume_secs: 30,
            identify_secs: 60,
            import_secs: 60,
            verify_secs: 5 * 60,
            playlists_secs: 30 * 60,
            worker_idle_secs: 30,
        }
    }
}

/// Verification sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// How long an import may stay invisible before it is re-triggered
    pub grace_secs: u64,
    /// Entries checked in parallel per sweep
    pub concurrency: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            grace_secs: 60 * 60,
            concurrency: 4,
        }
    }
}

/// Optional behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Write .m3u files for watched playlists
    pub m3u_playlists: bool,
    /// Push watched playlists to the media server
    pub media_server_playlists: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            m3u_playlists: true,
            media_server_playlists: true,
        }
    }
}

impl TimeoutConfig {
    pub fn external_call(&self) -> Duration {
        Duration::from_secs(self.external_call_secs)
    }
    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }
    pub fn identify(&self) -> Duration {
        Duration::from_secs(self.identify_secs)
    }
}

impl Config {
    /// Override secrets from the environment when set.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        let set = |slot: &mut Option<String>, key: &str| {
            if let Some(value) = get(key).filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        };
        set(&mut self.spotify.client_id, "SPOTIFY_CLIENT_ID");
        set(&mut self.spotify.client_secret, "SPOTIFY_CLIENT_SECRET");
        set(&mut self.tagger.acoustid_api_key, "ACOUSTID_API_KEY");
        set(&mut self.lidarr.api_key, "LIDARR_API_KEY");
        set(&mut self.plex.token, "PLEX_TOKEN");
    }

    /// Resolved state store path.
    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database
            .clone()
            .or_else(|| data_dir().map(|d| d.join(crate::db::DEFAULT_DB_NAME)))
            .unwrap_or_else(|| PathBuf::from(crate::db::DEFAULT_DB_NAME))
    }

    /// Check that everything the engine needs is present.
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut require = |value: &Option<String>, name: &str| {
            if value.as_deref().is_none_or(str::is_empty) {
                problems.push(format!("{name} is not set"));
            }
        };
        require(&self.spotify.client_id, "spotify.client_id");
        require(&self.spotify.client_secret, "spotify.client_secret");
        require(&self.tagger.acoustid_api_key, "tagger.acoustid_api_key");
        require(&self.lidarr.url, "lidarr.url");
        require(&self.lidarr.api_key, "lidarr.api_key");
        require(&self.plex.url, "plex.url");
        require(&self.plex.token, "plex.token");
        if self.plex.section_id.is_none() {
            problems.push("plex.section_id is not set".to_string());
        }
        if self.downloader.concurrency == 0 {
            problems.push("downloader.concurrency must be at least 1".to_string());
        }
        if self.downloader.delay_min_secs > self.downloader.delay_max_secs {
            problems.push("downloader.delay_min_secs exceeds delay_max_secs".to_string());
        }
        if !(0.0..=1.0).contains(&self.tagger.min_confidence) {
            problems.push("tagger.min_confidence must be between 0.0 and 1.0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("music-curator"))
}

/// Get the data directory path (state store lives here by default)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("music-curator"))
}

/// Resolve the config file path from an explicit flag, the environment,
/// or the OS config directory.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os("MUSIC_CURATOR_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    config_dir()
        .map(|d| d.join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Load configuration from disk and apply environment overrides.
///
/// A missing file yields the defaults; an unreadable or malformed file is
/// an error, since running the engine against a half-read config would
/// watch the wrong playlists.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.exists() {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        tracing::info!("Loaded config from {:?}", path);
        config
    } else {
        tracing::info!("No config file found at {:?}, using defaults", path);
        Config::default()
    };

    config.apply_env();
    Ok(config)
}

/// Save configuration to disk
///
/// Creates the parent directory if it doesn't exist.
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_config() -> Config {
        let mut config = Config::default();
        config.spotify.client_id = Some("id".into());
        config.spotify.client_secret = Some("secret".into());
        config.tagger.acoustid_api_key = Some("acoustid".into());
        config.lidarr.url = Some("http://lidarr:8686".into());
        config.lidarr.api_key = Some("key".into());
        config.plex.url = Some("http://plex:32400".into());
        config.plex.token = Some("token".into());
        config.plex.section_id = Some(3);
        config
    }

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[downloader]"));
        assert!(toml.contains("[scheduler]"));
        assert!(toml.contains("[verification]"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
[downloader]
concurrency = 4

[[source.playlists]]
id = "37i9dQZF1DXcBWIGoYBM5M"
name = "Today's Top Hits"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.downloader.concurrency, 4);
        assert_eq!(config.downloader.max_attempts, 5);
        assert_eq!(config.source.playlists.len(), 1);
        assert_eq!(config.source.playlists[0].name, "Today's Top Hits");
        assert_eq!(config.retry.backoff_base_secs, 30);
        assert!(config.features.m3u_playlists);
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut config = Config::default();
        config.plex.token = Some("from-file".into());
        config.apply_env_from(|key| match key {
            "PLEX_TOKEN" => Some("from-env".to_string()),
            "LIDARR_API_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.plex.token.as_deref(), Some("from-env"));
        assert_eq!(config.lidarr.api_key, None);
    }

    #[test]
    fn test_validate_lists_every_problem() {
        let err = Config::default().validate().unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected Invalid");
        };
        assert!(problems.iter().any(|p| p.contains("lidarr.url")));
        assert!(problems.iter().any(|p| p.contains("plex.section_id")));
        assert!(problems.len() >= 8);

        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = complete_config();
        config.source.playlists.push(WatchedPlaylist {
            id: "p1".into(),
            name: "Road Trip".into(),
        });
        save(&config, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.source.playlists, config.source.playlists);
        assert_eq!(loaded.plex.section_id, Some(3));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[downloader\nconcurrency = ").unwrap();
        assert!(matches!(load(&path), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.downloader.daily_limit, 75);
    }
}
