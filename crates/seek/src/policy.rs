//! Exclusion policy: decides whether a path is worth indexing.
//!
//! Three deny sets apply unconditionally (system paths, development
//! directory basenames, volume metadata basenames); hidden files and
//! development build artifacts are filtered only when opted in.
//! Symlinks never reach the policy: the crawler skips them outright.

use std::collections::HashSet;
use std::path::Path;

/// Absolute path prefixes that are never indexed.
const SYSTEM_PATHS: &[&str] = &[
    "/dev",
    "/private",
    "/System",
    "/Volumes",
    "/.fseventsd",
    "/tmp",
    "/var/folders",
    "/var/db",
    "/var/log",
    "/usr/bin",
    "/usr/sbin",
    "/usr/libexec",
    "/bin",
    "/sbin",
    "/cores",
    "/proc",
    "/sys",
    "/run",
    "/Library/Caches",
    "/Library/Logs",
    "/Library/Updates",
];

/// Development directory basenames, matched case-insensitively.
const DEV_DIRECTORY_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "build",
    "target",
    "dist",
    ".venv",
    "venv",
    "__pycache__",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".gradle",
    ".idea",
    "DerivedData",
    "Pods",
    ".npm",
    ".yarn",
    ".cache",
];

/// Volume metadata basenames, matched case-insensitively.
const VOLUME_METADATA_NAMES: &[&str] = &[
    ".spotlight-v100",
    ".documentrevisions-v100",
    ".fseventsd",
    ".trashes",
    ".trash",
    ".temporaryitems",
    ".apdisk",
    ".vol",
];

/// Build-artifact extensions filtered only when `skip_dev_extensions`
/// is enabled.
const DEV_EXTENSIONS: &[&str] = &[
    "o", "a", "obj", "pyc", "pyo", "class", "rlib", "rmeta", "d", "pch",
];

/// Decides whether a filesystem item is excluded from the index.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    dev_directories: HashSet<String>,
    skip_hidden: bool,
    skip_dev_extensions: bool,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            dev_directories: DEV_DIRECTORY_NAMES
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect(),
            skip_hidden: false,
            skip_dev_extensions: false,
        }
    }
}

impl ExclusionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the development-directory deny list.
    pub fn with_dev_directories<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dev_directories = names
            .into_iter()
            .map(|name| name.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    /// Enables filtering of hidden (dot-prefixed) items.
    pub fn with_skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    /// Enables filtering of development build-artifact extensions.
    pub fn with_skip_dev_extensions(mut self, skip: bool) -> Self {
        self.skip_dev_extensions = skip;
        self
    }

    /// Returns true when the item must not be indexed.
    pub fn excludes(&self, path: &Path, name: &str, is_directory: bool) -> bool {
        if name.is_empty() {
            return true;
        }

        if self.path_is_system(path) {
            return true;
        }

        let lower = name.to_ascii_lowercase();
        if VOLUME_METADATA_NAMES.contains(&lower.as_str()) {
            return true;
        }

        if is_directory && self.dev_directories.contains(&lower) {
            return true;
        }

        if self.skip_hidden && name.starts_with('.') {
            return true;
        }

        if self.skip_dev_extensions && !is_directory {
            if let Some(ext) = lower.rsplit_once('.').map(|(_, ext)| ext) {
                if DEV_EXTENSIONS.contains(&ext) {
                    return true;
                }
            }
        }

        false
    }

    fn path_is_system(&self, path: &Path) -> bool {
        SYSTEM_PATHS.iter().any(|deny| {
            let deny_path = Path::new(deny);
            path == deny_path || path.starts_with(deny_path)
        })
    }
}
