//! Optional TOML configuration
//!
//! Every value has a built-in default, the config file overrides defaults,
//! and command-line flags override the file.

use crate::utils::expand_tilde;
use directories::ProjectDirs;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Ledger location used when neither the config file nor `--db-path` set one
pub const DEFAULT_DB_PATH: &str = "~/.cache/video-validator/scan.db";

/// File extensions treated as video, compared case-insensitively
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
];

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub scan: ScanConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Worker threads; 0 means one per available CPU
    pub workers: usize,
    pub extensions: Vec<String>,
    /// Glob patterns for paths that are never scanned
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffprobe: PathBuf,
    pub ffmpeg: PathBuf,
    pub quick_timeout_secs: u64,
    pub deep_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            extensions: DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
            quick_timeout_secs: 30,
            deep_timeout_secs: 300,
        }
    }
}

/// Values from the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub exclude: Vec<String>,
    pub ffprobe: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
}

impl Config {
    /// Default location of the config file, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "video-validator").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. The default location is optional and
    /// falls back to built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.ledger.path = db_path;
        }
        if let Some(workers) = overrides.workers {
            self.scan.workers = workers;
        }
        self.scan.exclude.extend(overrides.exclude);
        if let Some(ffprobe) = overrides.ffprobe {
            self.tools.ffprobe = ffprobe;
        }
        if let Some(ffmpeg) = overrides.ffmpeg {
            self.tools.ffmpeg = ffmpeg;
        }
    }

    /// Ledger path with `~` expanded
    pub fn db_path(&self) -> PathBuf {
        expand_tilde(&self.ledger.path)
    }

    /// Effective worker count, never zero
    pub fn workers(&self) -> usize {
        if self.scan.workers > 0 {
            self.scan.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Compile the discovery filter from extensions and exclusions
    pub fn file_filter(&self) -> Result<FileFilter, ConfigError> {
        FileFilter::new(&self.scan.extensions, &self.scan.exclude)
    }
}

/// Decides which discovered files are candidates for validation
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: Vec<String>,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(extensions: &[String], exclude: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let exclude = builder.build().map_err(|source| ConfigError::Pattern {
            pattern: exclude.join(", "),
            source,
        })?;

        Ok(Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude,
        })
    }

    pub fn is_video(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.is_match(path)
    }

    pub fn accepts(&self, path: &Path) -> bool {
        self.is_video(path) && !self.is_excluded(path)
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: GlobSet::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[scan]\nworkers = 3\n\n[tools]\ndeep_timeout_secs = 600\n",
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.scan.workers, 3);
        assert_eq!(config.tools.deep_timeout_secs, 600);
        assert_eq!(config.tools.quick_timeout_secs, 30);
        assert_eq!(config.ledger.path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.scan.extensions.len(), DEFAULT_VIDEO_EXTENSIONS.len());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[scan\nworkers = ").unwrap();

        assert!(matches!(Config::load(Some(path.as_path())), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load(Some(temp_dir.path().join("nope.toml").as_path()));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.scan.exclude.push("**/samples/**".to_string());
        config.apply_cli_overrides(CliOverrides {
            db_path: Some(PathBuf::from("/tmp/ledger.db")),
            workers: Some(2),
            exclude: vec!["**/extras/**".to_string()],
            ffprobe: None,
            ffmpeg: Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")),
        });

        assert_eq!(config.db_path(), PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.workers(), 2);
        assert_eq!(config.scan.exclude.len(), 2);
        assert_eq!(config.tools.ffprobe, PathBuf::from("ffprobe"));
        assert_eq!(config.tools.ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn test_workers_default_to_parallelism() {
        assert!(Config::default().workers() >= 1);
    }

    #[test]
    fn test_filter_extensions_case_insensitive() {
        let filter = FileFilter::default();
        assert!(filter.accepts(Path::new("/v/Movie.MKV")));
        assert!(filter.accepts(Path::new("/v/clip.Mp4")));
        assert!(!filter.accepts(Path::new("/v/notes.txt")));
        assert!(!filter.accepts(Path::new("/v/mkv")));
    }

    #[test]
    fn test_filter_exclusions() {
        let filter = FileFilter::new(
            &[".mp4".to_string()],
            &["**/sample/**".to_string()],
        )
        .unwrap();

        assert!(filter.accepts(Path::new("/v/film/film.mp4")));
        assert!(!filter.accepts(Path::new("/v/film/sample/film.mp4")));
        assert!(!filter.accepts(Path::new("/v/film/film.mkv")));
    }

    #[test]
    fn test_bad_pattern_is_reported() {
        let result = FileFilter::new(&[], &["a[".to_string()]);
        assert!(matches!(result, Err(ConfigError::Pattern { .. })));
    }
}
