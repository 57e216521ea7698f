use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Directory names never included in a project snapshot.
pub const IGNORED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", ".git"];

/// One entry found while walking a project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkedEntry {
    /// A regular file: root-relative path with `/` separators, and its content.
    File { path: String, content: String },
    /// A directory: root-relative path with `/` separators.
    Directory { path: String },
}

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// The file will either have the old contents or the new contents, never a
/// partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Whether a path component should be skipped when snapshotting.
///
/// Hidden entries (leading `.`) and well-known output/dependency directories
/// are skipped.
#[must_use]
pub fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRS.contains(&name)
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().map_or(true, is_ignored_name)
}

/// Walk `root` and return every file and directory below it, in lexical order.
///
/// Paths are relative to `root`, use `/` separators and carry no leading slash.
///
/// # Errors
/// Returns an error if the directory cannot be walked or a file cannot be read.
pub fn walk_tree(root: &Path) -> io::Result<Vec<WalkedEntry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e));

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if entry.depth() == 0 {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            entries.push(WalkedEntry::Directory { path });
        } else if entry.file_type().is_file() {
            let content = read_to_string_lossy(entry.path())?;
            entries.push(WalkedEntry::File { path, content });
        }
    }

    Ok(entries)
}
