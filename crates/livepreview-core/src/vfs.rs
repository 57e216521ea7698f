//! Virtual file system collaborator.
//!
//! The preview compiler never mutates the virtual file system. It reads
//! ordered snapshots ([`FileSet`]) and subscribes to change notifications
//! through the [`VirtualFileSystem`] trait.
//!
//! [`MemoryFileSystem`] is a small in-memory implementation that applies the
//! create/edit/rename/delete operations produced by an AI tool-call layer.

use crate::error::Error;
use livepreview_util::fs::{walk_tree, WalkedEntry};
use livepreview_util::hash::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

/// Kind of a virtual file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    /// Canonical path with a leading `/`.
    pub path: String,
    /// File content (empty for directories).
    pub content: String,
    pub kind: FileKind,
}

impl VirtualFile {
    /// Extension of the file name including the dot, lowercased.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        extension(&self.path)
    }
}

/// Ordered, immutable view of the virtual file system.
///
/// Iteration is in ascending lexical path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: BTreeMap<String, VirtualFile>,
}

impl FileSet {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(path, content)` pairs.
    pub fn from_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut set = Self::new();
        for (path, content) in files {
            set.insert_file(path.as_ref(), content);
        }
        set
    }

    /// Parse a JSON object mapping paths to contents.
    ///
    /// ```json
    /// { "/App.jsx": "export default () => <div/>", "/styles.css": "" }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let files: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self::from_files(files))
    }

    /// Snapshot a directory on disk. Hidden entries and dependency/output
    /// directories are skipped.
    pub fn from_dir(root: &Path) -> Result<Self, Error> {
        let walked = walk_tree(root).map_err(|e| Error::Snapshot {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut set = Self::new();
        for entry in walked {
            match entry {
                WalkedEntry::File { path, content } => set.insert_file(&path, content),
                WalkedEntry::Directory { path } => set.insert_dir(&path),
            }
        }
        Ok(set)
    }

    /// Insert or replace a file. Missing parent directories are created.
    pub fn insert_file(&mut self, path: &str, content: impl Into<String>) {
        let path = normalize_path(path);
        self.insert_parents(&path);
        self.entries.insert(
            path.clone(),
            VirtualFile {
                path,
                content: content.into(),
                kind: FileKind::File,
            },
        );
    }

    /// Insert a directory entry (and its parents).
    pub fn insert_dir(&mut self, path: &str) {
        let path = normalize_path(path);
        if path == "/" {
            return;
        }
        self.insert_parents(&path);
        self.entries.entry(path.clone()).or_insert(VirtualFile {
            path,
            content: String::new(),
            kind: FileKind::Directory,
        });
    }

    fn insert_parents(&mut self, path: &str) {
        let mut parent = parent_dir(path);
        while parent != "/" {
            self.entries
                .entry(parent.to_string())
                .or_insert_with(|| VirtualFile {
                    path: parent.to_string(),
                    content: String::new(),
                    kind: FileKind::Directory,
                });
            parent = parent_dir(parent);
        }
    }

    /// Remove an entry and, for directories, everything below it.
    pub fn remove(&mut self, path: &str) -> Option<VirtualFile> {
        let path = normalize_path(path);
        let removed = self.entries.remove(&path)?;
        if removed.kind == FileKind::Directory {
            let prefix = format!("{path}/");
            self.entries.retain(|p, _| !p.starts_with(&prefix));
        }
        Some(removed)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&VirtualFile> {
        self.entries.get(path)
    }

    /// Whether `path` is a regular file.
    #[must_use]
    pub fn is_file(&self, path: &str) -> bool {
        self.entries
            .get(path)
            .is_some_and(|f| f.kind == FileKind::File)
    }

    /// Whether `path` is a directory.
    #[must_use]
    pub fn is_dir(&self, path: &str) -> bool {
        self.entries
            .get(path)
            .is_some_and(|f| f.kind == FileKind::Directory)
    }

    /// All regular files in lexical path order.
    pub fn files(&self) -> impl Iterator<Item = &VirtualFile> {
        self.entries.values().filter(|f| f.kind == FileKind::File)
    }

    /// All entries (files and directories) in lexical path order.
    pub fn entries(&self) -> impl Iterator<Item = &VirtualFile> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Content fingerprint over every file's path and content.
    ///
    /// Two snapshots with the same files produce the same fingerprint
    /// regardless of how they were built.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut fp = Fingerprint::new();
        for file in self.files() {
            fp.entry(&file.path, file.content.as_bytes());
        }
        fp.finish()
    }
}

/// Normalize a virtual path: leading `/`, no empty, `.` or `..` segments,
/// no trailing slash. `..` above the root clamps at `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Parent directory of a canonical path (`/` for top-level entries).
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Lowercased extension including the dot, e.g. `.jsx`.
#[must_use]
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some(name[dot..].to_ascii_lowercase())
}

/// Read access to a virtual file system plus change notifications.
pub trait VirtualFileSystem: Send + Sync {
    /// Consistent snapshot of every entry.
    fn snapshot(&self) -> FileSet;

    /// Receiver that observes a new version number after every mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// File system mutation produced by an external editor (e.g. AI tool calls).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FsOperation {
    Create { path: String, content: String },
    CreateDir { path: String },
    Edit { path: String, content: String },
    Rename { from: String, to: String },
    Delete { path: String },
}

/// In-memory [`VirtualFileSystem`].
pub struct MemoryFileSystem {
    files: RwLock<FileSet>,
    version: watch::Sender<u64>,
}

impl MemoryFileSystem {
    /// Create a file system holding `files`.
    #[must_use]
    pub fn new(files: FileSet) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            files: RwLock::new(files),
            version,
        }
    }

    /// Current mutation version (starts at 0).
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Apply one mutation and notify subscribers.
    pub fn apply(&self, op: FsOperation) -> Result<u64, Error> {
        {
            let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
            apply_to(&mut files, op)?;
        }
        let mut next = 0;
        self.version.send_modify(|v| {
            *v += 1;
            next = *v;
        });
        Ok(next)
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new(FileSet::new())
    }
}

impl VirtualFileSystem for MemoryFileSystem {
    fn snapshot(&self) -> FileSet {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

fn apply_to(files: &mut FileSet, op: FsOperation) -> Result<(), Error> {
    let fail = |operation: &'static str, path: &str, message: &str| Error::FileSystem {
        operation,
        path: path.to_string(),
        message: message.to_string(),
    };

    match op {
        FsOperation::Create { path, content } => {
            let canonical = normalize_path(&path);
            if files.get(&canonical).is_some() {
                return Err(fail("create", &canonical, "already exists"));
            }
            files.insert_file(&canonical, content);
        }
        FsOperation::CreateDir { path } => {
            let canonical = normalize_path(&path);
            if files.is_file(&canonical) {
                return Err(fail("mkdir", &canonical, "a file with that name exists"));
            }
            files.insert_dir(&canonical);
        }
        FsOperation::Edit { path, content } => {
            let canonical = normalize_path(&path);
            if !files.is_file(&canonical) {
                return Err(fail("edit", &canonical, "no such file"));
            }
            files.insert_file(&canonical, content);
        }
        FsOperation::Rename { from, to } => {
            let from = normalize_path(&from);
            let to = normalize_path(&to);
            if files.get(&to).is_some() {
                return Err(fail("rename", &to, "destination already exists"));
            }
            let prefix = format!("{from}/");
            let moved: Vec<VirtualFile> = files
                .entries()
                .filter(|f| f.path == from || f.path.starts_with(&prefix))
                .cloned()
                .collect();
            if moved.is_empty() {
                return Err(fail("rename", &from, "no such file or directory"));
            }
            files.remove(&from);
            for entry in moved {
                let new_path = format!("{to}{}", &entry.path[from.len()..]);
                match entry.kind {
                    FileKind::File => files.insert_file(&new_path, entry.content),
                    FileKind::Directory => files.insert_dir(&new_path),
                }
            }
        }
        FsOperation::Delete { path } => {
            let canonical = normalize_path(&path);
            if files.remove(&canonical).is_none() {
                return Err(fail("delete", &canonical, "no such file or directory"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("App.jsx"), "/App.jsx");
        assert_eq!(normalize_path("/a/./b/../c.js"), "/a/c.js");
        assert_eq!(normalize_path("/../../x"), "/x");
        assert_eq!(normalize_path("/dir/"), "/dir");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/App.jsx"), "/");
        assert_eq!(parent_dir("/components/Button.jsx"), "/components");
        assert_eq!(parent_dir("/"), "/");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("/App.JSX").as_deref(), Some(".jsx"));
        assert_eq!(extension("/styles/main.css").as_deref(), Some(".css"));
        assert_eq!(extension("/.env"), None);
        assert_eq!(extension("/Makefile"), None);
    }

    #[test]
    fn test_insert_file_creates_parent_dirs() {
        let files = FileSet::from_files([("/components/ui/Button.jsx", "x")]);
        assert!(files.is_dir("/components"));
        assert!(files.is_dir("/components/ui"));
        assert!(files.is_file("/components/ui/Button.jsx"));
        assert_eq!(files.files().count(), 1);
    }

    #[test]
    fn test_files_iterate_in_lexical_order() {
        let files = FileSet::from_files([("/b.css", "b"), ("/a.css", "a"), ("/App.jsx", "")]);
        let paths: Vec<&str> = files.files().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/App.jsx", "/a.css", "/b.css"]);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = FileSet::from_files([("/App.jsx", "1")]);
        let b = FileSet::from_files([("/App.jsx", "1")]);
        let c = FileSet::from_files([("/App.jsx", "2")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_from_json() {
        let files = FileSet::from_json(r#"{"/App.jsx": "export default 1", "styles.css": ""}"#)
            .unwrap();
        assert!(files.is_file("/App.jsx"));
        assert!(files.is_file("/styles.css"));
    }

    #[test]
    fn test_remove_directory_removes_children() {
        let mut files = FileSet::from_files([("/ui/A.jsx", "a"), ("/ui/B.jsx", "b"), ("/App.jsx", "")]);
        files.remove("/ui");
        assert_eq!(files.files().count(), 1);
        assert!(!files.is_dir("/ui"));
    }

    #[test]
    fn test_memory_fs_apply_bumps_version() {
        let fs = MemoryFileSystem::default();
        let rx = fs.subscribe();
        let v = fs
            .apply(FsOperation::Create {
                path: "/App.jsx".to_string(),
                content: "x".to_string(),
            })
            .unwrap();
        assert_eq!(v, 1);
        assert_eq!(*rx.borrow(), 1);
        assert!(fs.snapshot().is_file("/App.jsx"));
    }

    #[test]
    fn test_memory_fs_rename_directory() {
        let fs = MemoryFileSystem::new(FileSet::from_files([("/ui/Button.jsx", "b")]));
        fs.apply(FsOperation::Rename {
            from: "/ui".to_string(),
            to: "/components".to_string(),
        })
        .unwrap();
        let snapshot = fs.snapshot();
        assert!(snapshot.is_file("/components/Button.jsx"));
        assert!(!snapshot.is_file("/ui/Button.jsx"));
    }

    #[test]
    fn test_memory_fs_rejects_invalid_ops() {
        let fs = MemoryFileSystem::new(FileSet::from_files([("/App.jsx", "")]));
        assert!(fs
            .apply(FsOperation::Edit {
                path: "/Missing.jsx".to_string(),
                content: String::new(),
            })
            .is_err());
        assert!(fs
            .apply(FsOperation::Create {
                path: "/App.jsx".to_string(),
                content: String::new(),
            })
            .is_err());
        assert!(fs
            .apply(FsOperation::Delete {
                path: "/nope".to_string(),
            })
            .is_err());
        assert_eq!(fs.version(), 0);
    }

    #[test]
    fn test_snapshot_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("components")).unwrap();
        std::fs::write(dir.path().join("App.jsx"), "export default 1").unwrap();
        std::fs::write(dir.path().join("components/Card.jsx"), "c").unwrap();

        let files = FileSet::from_dir(dir.path()).unwrap();
        assert!(files.is_file("/App.jsx"));
        assert!(files.is_dir("/components"));
        assert!(files.is_file("/components/Card.jsx"));
    }
}
