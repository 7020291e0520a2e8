//! Finding candidate video files under the requested roots

use crate::config::FileFilter;
use crate::interrupt::CancelFlag;
use crate::utils::absolute_path;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files found by a discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Absolute, de-duplicated, sorted
    pub files: Vec<PathBuf>,
    /// Roots that were not directories
    pub skipped_roots: Vec<PathBuf>,
}

/// Walk every root and collect files accepted by `filter`.
///
/// Roots that are not directories are reported, not fatal. Entries that
/// cannot be read are skipped. Overlapping roots yield each file once.
/// The walk stops early once `cancel` is set; the caller is expected to
/// check the flag before using a partial result.
pub fn find_video_files(roots: &[PathBuf], filter: &FileFilter, cancel: &CancelFlag) -> Discovery {
    let mut files = BTreeSet::new();
    let mut skipped_roots = Vec::new();

    for root in roots {
        if cancel.is_cancelled() {
            break;
        }
        if !root.is_dir() {
            tracing::debug!(root = %root.display(), "skipped non-directory");
            skipped_roots.push(root.clone());
            continue;
        }

        let root = absolute_path(root);
        walk_root(&root, filter, cancel, &mut files);
    }

    Discovery {
        files: files.into_iter().collect(),
        skipped_roots,
    }
}

fn walk_root(root: &Path, filter: &FileFilter, cancel: &CancelFlag, files: &mut BTreeSet<PathBuf>) {
    for entry in WalkDir::new(root).follow_links(false) {
        if cancel.is_cancelled() {
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if filter.accepts(entry.path()) {
            files.insert(entry.into_path());
        }
    }
}
