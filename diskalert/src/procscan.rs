//! Best-effort /proc descriptor scanning.
//!
//! Enumerates `/proc/<pid>/fd/*` across live processes. Entries that
//! vanish mid-scan or deny access are skipped silently; the process may
//! have exited or belong to another user. Results are racy by nature and
//! callers must tolerate stale matches.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

const PROC: &str = "/proc";

/// One open descriptor located in the process filesystem.
#[derive(Debug, Clone)]
pub struct FdInfo {
    pub pid: u32,
    pub fd: u32,
    /// Link target of the descriptor entry.
    pub path: PathBuf,
    pub inode: u64,
    pub dev: u64,
}

/// Find descriptors whose link target equals `target` or
/// `"<target> (deleted)"`, the marker the kernel appends once the
/// directory entry is gone.
pub fn find_by_path(target: &Path) -> io::Result<Vec<FdInfo>> {
    let deleted = PathBuf::from(format!("{} (deleted)", target.display()));
    let mut found = Vec::new();
    each_process_fd(|pid, fd, fd_path| {
        let Ok(link) = fs::read_link(&fd_path) else {
            return;
        };
        if link != target && link != deleted {
            return;
        }
        let Ok(meta) = fs::metadata(&fd_path) else {
            return;
        };
        found.push(FdInfo {
            pid,
            fd,
            path: link,
            inode: meta.ino(),
            dev: meta.dev(),
        });
    })?;
    Ok(found)
}

/// Find descriptors referring to `(inode, dev)` by stat-ing each fd path.
pub fn find_by_inode(inode: u64, dev: u64) -> io::Result<Vec<FdInfo>> {
    let mut found = Vec::new();
    each_process_fd(|pid, fd, fd_path| {
        let Ok(meta) = fs::metadata(&fd_path) else {
            return;
        };
        if meta.ino() != inode || meta.dev() != dev {
            return;
        }
        let path = fs::read_link(&fd_path).unwrap_or_default();
        found.push(FdInfo {
            pid,
            fd,
            path,
            inode,
            dev,
        });
    })?;
    Ok(found)
}

/// Visit every readable `/proc/<pid>/fd/<fd>` entry.
fn each_process_fd<F: FnMut(u32, u32, PathBuf)>(mut visit: F) -> io::Result<()> {
    for entry in fs::read_dir(PROC)? {
        let Ok(entry) = entry else {
            continue;
        };
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd_entry in fds {
            let Ok(fd_entry) = fd_entry else {
                continue;
            };
            let Some(fd) = fd_entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            visit(pid, fd, fd_entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn finds_own_descriptor_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("held.dat");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"contents").unwrap();

        let found = find_by_path(&path).unwrap();
        let pid = std::process::id();
        assert!(
            found.iter().any(|info| info.pid == pid),
            "expected to find our own fd for {}",
            path.display()
        );
    }

    #[test]
    fn finds_deleted_descriptor_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doomed.dat");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"contents").unwrap();
        fs::remove_file(&path).unwrap();

        let found = find_by_path(&path).unwrap();
        let pid = std::process::id();
        assert!(found.iter().any(|info| info.pid == pid));
        drop(file);
    }

    #[test]
    fn finds_own_descriptor_by_inode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("held.dat");
        let file = File::create(&path).unwrap();
        let meta = file.metadata().unwrap();

        let found = find_by_inode(meta.ino(), meta.dev()).unwrap();
        let pid = std::process::id();
        assert!(found.iter().any(|info| info.pid == pid && info.inode == meta.ino()));
    }

    #[test]
    fn unknown_path_matches_nothing() {
        let found = find_by_path(Path::new("/nonexistent/zzz")).unwrap();
        assert!(found.is_empty());
    }
}
