//! Shared path helpers

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~`, and paths on systems with no resolvable
/// home, are returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// Make `path` absolute against the current directory without touching the
/// filesystem (symlinks are left alone).
pub fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Normalize a path for display (strip Windows long-path prefixes).
pub fn display_path(path: &Path) -> String {
    let path_str = path.to_string_lossy().to_string();
    #[cfg(windows)]
    {
        if let Some(stripped) = path_str.strip_prefix(r"\\?\UNC\") {
            return format!(r"\\{}", stripped);
        }
        if let Some(stripped) = path_str.strip_prefix(r"\\?\") {
            return stripped.to_string();
        }
    }
    path_str
}

/// Convert to long path format for Windows (\\?\)
///
/// Media libraries nest deeply enough to exceed MAX_PATH (260 characters).
#[cfg(windows)]
pub fn to_long_path(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if s.starts_with(r"\\?\") {
            return path.to_path_buf();
        }
    }

    let absolute = absolute_path(path);
    match absolute.to_str() {
        Some(s) => PathBuf::from(format!(r"\\?\{}", s)),
        None => absolute,
    }
}

/// Metadata that falls back to the long path form on Windows when normal
/// access fails with ERROR_PATH_NOT_FOUND (3).
#[cfg(windows)]
pub fn safe_metadata(path: &Path) -> std::io::Result<std::fs::Metadata> {
    match std::fs::metadata(path) {
        Ok(m) => Ok(m),
        Err(e) if e.raw_os_error() == Some(3) => std::fs::metadata(to_long_path(path)),
        Err(e) => Err(e),
    }
}

#[cfg(not(windows))]
pub fn safe_metadata(path: &Path) -> std::io::Result<std::fs::Metadata> {
    std::fs::metadata(path)
}
