//! Entry factory: derives an [`Entry`] from a path and its filesystem
//! metadata, including the bundle-size rollup.
//!
//! Bundles (opaque package directories such as `Example.app`) are
//! indexed as a single file-like item: `is_directory` stays true, but
//! `size` carries the recursive sum of non-directory descendants and
//! `file_extension` derives from the bundle suffix.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::clock::Clock;
use crate::error::{Result, SeekError};
use crate::types::Entry;

/// Directory suffixes the OS treats as opaque packages.
const BUNDLE_EXTENSIONS: &[&str] = &[
    "app",
    "appex",
    "framework",
    "bundle",
    "kext",
    "plugin",
    "qlgenerator",
    "xpc",
    "xcodeproj",
    "xcworkspace",
    "playground",
    "photoslibrary",
    "imovielibrary",
    "tvlibrary",
    "fcpbundle",
    "pages",
    "numbers",
    "key",
    "rtfd",
    "scptd",
    "workflow",
];

/// True when a directory at `path` should be treated as a bundle.
pub fn is_bundle(path: &Path, is_directory: bool) -> bool {
    if !is_directory {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| BUNDLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Builds [`Entry`] values from filesystem items.
#[derive(Debug, Clone)]
pub struct EntryFactory {
    clock: Clock,
}

impl Default for EntryFactory {
    fn default() -> Self {
        Self::new(Clock::system())
    }
}

impl EntryFactory {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    /// Stats `path` and derives its entry. Symlinks are rejected: the
    /// scanner and monitor skip them before reaching the factory.
    pub fn entry_for_path(&self, path: &Path) -> Result<Entry> {
        let metadata = fs::symlink_metadata(path)
            .map_err(|_| SeekError::InvalidPath(path.to_path_buf()))?;
        self.entry_from_metadata(path, &metadata)
    }

    /// Derives an entry from already-fetched metadata.
    pub fn entry_from_metadata(&self, path: &Path, metadata: &fs::Metadata) -> Result<Entry> {
        if metadata.file_type().is_symlink() {
            return Err(SeekError::InvalidPath(path.to_path_buf()));
        }

        let name = entry_name(path).ok_or_else(|| SeekError::InvalidPath(path.to_path_buf()))?;
        let is_directory = metadata.is_dir();
        let bundle = is_bundle(path, is_directory);

        let file_extension = if is_directory && !bundle {
            None
        } else {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
        };

        let size = if bundle {
            Some(bundle_size(path))
        } else if is_directory {
            None
        } else {
            Some(file_size(path, metadata))
        };

        let date_modified = metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or_else(|| self.clock.now());

        Ok(Entry {
            name,
            full_path: path.to_string_lossy().into_owned(),
            is_directory,
            file_extension,
            size,
            date_modified,
        })
    }
}

/// Basename of `path`; falls back to the path itself for roots like `/`.
fn entry_name(path: &Path) -> Option<String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Reported size for a regular file. Re-stats when the cached metadata
/// looks unusable, then gives up with zero rather than failing the entry.
fn file_size(path: &Path, metadata: &fs::Metadata) -> i64 {
    if metadata.is_file() {
        return metadata.len() as i64;
    }
    fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0)
}

/// Recursive sum of non-directory descendant sizes inside a bundle.
///
/// Hidden descendants count. An unreadable child is logged and skipped;
/// it never aborts the rollup.
fn bundle_size(bundle_root: &Path) -> i64 {
    let mut total: i64 = 0;
    let mut stack = vec![bundle_root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let reader = match fs::read_dir(&dir) {
            Ok(reader) => reader,
            Err(error) => {
                tracing::debug!(path = %dir.display(), %error, "bundle child unreadable, skipped");
                continue;
            }
        };
        for child in reader {
            let child = match child {
                Ok(child) => child,
                Err(error) => {
                    tracing::debug!(path = %dir.display(), %error, "bundle child unreadable, skipped");
                    continue;
                }
            };
            let Ok(metadata) = child.path().symlink_metadata() else {
                continue;
            };
            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(child.path());
            } else {
                total = total.saturating_add(metadata.len() as i64);
            }
        }
    }

    total
}
