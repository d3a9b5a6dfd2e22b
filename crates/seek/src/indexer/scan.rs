//! Directory scanning with the exclusion policy applied.
//!
//! One scanner instance is shared by the indexer workers and the
//! refresh path. Filesystem errors are never fatal here: an unreadable
//! directory is logged and reads as empty.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::error::Result;
use crate::policy::ExclusionPolicy;
use crate::storage::entry::{is_bundle, EntryFactory};
use crate::types::Entry;

/// Per-scan behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Treat bundles as opaque single items instead of descending.
    pub skip_package_descendants: bool,
    /// Skip dot-prefixed items regardless of policy configuration.
    pub skip_hidden: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_package_descendants: true,
            skip_hidden: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scanner {
    policy: Arc<ExclusionPolicy>,
    factory: EntryFactory,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(policy: Arc<ExclusionPolicy>, factory: EntryFactory, options: ScanOptions) -> Self {
        Self {
            policy,
            factory,
            options,
        }
    }

    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    pub fn factory(&self) -> &EntryFactory {
        &self.factory
    }

    /// Non-recursive scan of `root` returning file entries only.
    /// Bundles count as files here: one entry, rolled-up size.
    pub fn scan_root_level_files(&self, root: &Path) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for (path, metadata) in self.readable_children(root) {
            let file_type = metadata.file_type();
            if file_type.is_dir() && !is_bundle(&path, true) {
                continue;
            }
            if let Ok(entry) = self.factory.entry_from_metadata(&path, &metadata) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Subdirectories of `root` eligible for crawling: directories
    /// minus bundles and excluded paths.
    pub fn top_level_directories(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut directories = Vec::new();
        for (path, metadata) in self.readable_children(root) {
            if !metadata.is_dir() || is_bundle(&path, true) {
                continue;
            }
            directories.push(path);
        }
        Ok(directories)
    }

    /// Single-threaded recursive scan. Used by tests and by the
    /// subtree-rebuild path, where trees are small.
    pub fn scan_recursive(&self, dir: &Path) -> Vec<Entry> {
        let mut entries = Vec::new();
        if let Ok(entry) = self.factory.entry_for_path(dir) {
            entries.push(entry);
        }
        self.scan_recursive_into(dir, &mut entries);
        entries
    }

    fn scan_recursive_into(&self, dir: &Path, entries: &mut Vec<Entry>) {
        for (path, metadata) in self.readable_children(dir) {
            let is_dir = metadata.is_dir();
            let bundle = is_dir && is_bundle(&path, true);
            if let Ok(entry) = self.factory.entry_from_metadata(&path, &metadata) {
                entries.push(entry);
            }
            if is_dir && !(bundle && self.options.skip_package_descendants) {
                self.scan_recursive_into(&path, entries);
            }
        }
    }

    /// Roots of subtrees changed since `since` (epoch seconds).
    ///
    /// A directory whose own mtime exceeds `since` is reported as-is
    /// and not descended into; unchanged directories are descended to
    /// find deeper changes.
    pub fn changed_subtree_roots(&self, dir: &Path, since: f64) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        self.collect_changed(dir, since, &mut changed);
        changed
    }

    fn collect_changed(&self, dir: &Path, since: f64, changed: &mut Vec<PathBuf>) {
        if directory_mtime(dir).map(|mtime| mtime > since).unwrap_or(false) {
            changed.push(dir.to_path_buf());
            return;
        }
        for (path, metadata) in self.readable_children(dir) {
            if !metadata.is_dir() || is_bundle(&path, true) {
                continue;
            }
            self.collect_changed(&path, since, changed);
        }
    }

    /// Lists `dir`, yielding `(path, metadata)` for children that pass
    /// the symlink and exclusion checks. Unreadable directories and
    /// children read as empty.
    fn readable_children(&self, dir: &Path) -> Vec<(PathBuf, fs::Metadata)> {
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(error) => {
                tracing::debug!(path = %dir.display(), %error, "directory unreadable, treated as empty");
                return Vec::new();
            }
        };

        let mut children = Vec::new();
        for child in reader.flatten() {
            let path = child.path();
            let Ok(metadata) = path.symlink_metadata() else {
                continue;
            };
            if metadata.file_type().is_symlink() {
                continue;
            }
            let name = child.file_name();
            let name = name.to_string_lossy();
            if self.options.skip_hidden && name.starts_with('.') {
                continue;
            }
            if self.policy.excludes(&path, &name, metadata.is_dir()) {
                continue;
            }
            children.push((path, metadata));
        }
        children
    }
}

fn directory_mtime(dir: &Path) -> Option<f64> {
    fs::symlink_metadata(dir)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::fs::File;
    use std::io::Write;

    fn scanner() -> Scanner {
        Scanner::new(
            Arc::new(ExclusionPolicy::new()),
            EntryFactory::new(Clock::system()),
            ScanOptions::default(),
        )
    }

    fn touch(path: &Path, bytes: usize) {
        let mut file = File::create(path).expect("create");
        file.write_all(&vec![0u8; bytes]).expect("write");
    }

    #[test]
    fn root_level_scan_returns_files_not_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("a.txt"), 1);
        touch(&dir.path().join("b.md"), 1);
        fs::create_dir(dir.path().join("sub")).expect("mkdir");

        let mut names: Vec<String> = scanner()
            .scan_root_level_files(dir.path())
            .expect("scan")
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.md"]);
    }

    #[test]
    fn bundles_count_as_root_level_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("Tool.app");
        fs::create_dir_all(bundle.join("Contents")).expect("mkdirs");
        touch(&bundle.join("Contents/bin"), 64);

        let entries = scanner().scan_root_level_files(dir.path()).expect("scan");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Tool.app");
        assert_eq!(entries[0].size, Some(64));

        let dirs = scanner().top_level_directories(dir.path()).expect("dirs");
        assert!(dirs.is_empty(), "bundles are not crawlable directories");
    }

    #[test]
    fn recursive_scan_covers_nested_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("x/y")).expect("mkdirs");
        touch(&dir.path().join("x/a.txt"), 1);
        touch(&dir.path().join("x/y/b.txt"), 1);

        let entries = scanner().scan_recursive(&dir.path().join("x"));
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"x"));
        assert!(names.contains(&"y"));
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"b.txt"));
    }

    #[test]
    fn changed_subtree_roots_prunes_unchanged_trees() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stale = dir.path().join("stale");
        let fresh = dir.path().join("fresh");
        fs::create_dir_all(stale.join("deep")).expect("mkdirs");
        fs::create_dir(&fresh).expect("mkdir");

        // Everything existing so far counts as "old".
        std::thread::sleep(std::time::Duration::from_millis(20));
        let since = crate::clock::unix_now_secs();
        std::thread::sleep(std::time::Duration::from_millis(20));
        touch(&fresh.join("new.txt"), 1);

        let changed = scanner().changed_subtree_roots(dir.path(), since);
        assert_eq!(changed, vec![fresh], "only the touched subtree is reported");
    }

    #[test]
    fn unreadable_directory_reads_as_empty() {
        let missing = Path::new("/definitely/not/here");
        assert!(scanner().scan_recursive(missing).is_empty());
        assert!(scanner()
            .scan_root_level_files(missing)
            .expect("scan")
            .is_empty());
    }
}
