//! Deleted-open-file recovery engine.
//!
//! When an unlink of a still-open file is observed, the engine copies the
//! file's current bytes out of `/proc/<pid>/fd/<fd>` before the last
//! descriptor closes, writes a metadata sidecar next to the artifact, and
//! updates the process-wide counters. All failures are per-file; nothing
//! aborts the engine.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use log::{debug, info, warn};
use thiserror::Error;

use crate::events::fixed_str;
use crate::procscan;
use crate::stats::Stats;
use diskalert_common::RecoveryEvent;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("file descriptor {pid}/{fd} no longer exists: {source}")]
    FdGone {
        pid: u32,
        fd: u32,
        source: io::Error,
    },

    #[error("no open file descriptor found for {path}")]
    NoOpenFd { path: PathBuf },

    #[error("recovery directory holds {count} artifacts, cap is {max}")]
    CapacityExhausted { count: u64, max: u64 },

    #[error("failed to enumerate {path}: {source}")]
    Enumerate { path: PathBuf, source: io::Error },

    #[error("failed to open source {path}: {source}")]
    OpenSource { path: PathBuf, source: io::Error },

    #[error("failed to create recovery file {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to copy file contents into {path}: {source}")]
    Copy { path: PathBuf, source: io::Error },

    #[error("failed to sync recovery file {path}: {source}")]
    Sync { path: PathBuf, source: io::Error },
}

/// A successfully written artifact.
#[derive(Debug)]
pub struct RecoveredFile {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct RecoveryEngine {
    recovery_dir: PathBuf,
    max_files: u64,
}

impl RecoveryEngine {
    pub fn new(recovery_dir: PathBuf, max_files: u64) -> Self {
        Self {
            recovery_dir,
            max_files,
        }
    }

    /// Handle one deletion record from the recovery ring.
    pub fn handle_event(&self, event: &RecoveryEvent, stats: &Stats) {
        stats.incr_deleted();
        let filename = fixed_str(&event.filename);
        let comm = fixed_str(&event.comm);
        info!(
            "deletion detected: file={filename} inode={} size={} deleted_by={comm} (pid={})",
            event.inode, event.file_size, event.deleting_pid
        );

        if event.holder_pid == 0 || event.holder_fd == 0 {
            warn!("no open file descriptor known for {filename}, cannot recover");
            stats.incr_failed();
            return;
        }

        info!(
            "file still open: pid={} fd={}, attempting recovery",
            event.holder_pid, event.holder_fd
        );
        match self.recover_from_fd(event.holder_pid, event.holder_fd, event.inode, &filename) {
            Ok(recovered) => {
                info!(
                    "recovered {} bytes to {}",
                    recovered.bytes,
                    recovered.path.display()
                );
                stats.incr_recovered(event.file_size);
            }
            Err(error) => {
                warn!("recovery of {filename} failed: {error}");
                stats.incr_failed();
            }
        }
    }

    /// Copy the bytes behind `/proc/<pid>/fd/<fd>` into a fresh artifact
    /// named after `original_path`. The artifact and its sidecar are
    /// created in that order; a partial artifact never survives a copy
    /// or sync failure, and a sidecar failure does not fail the
    /// recovery.
    pub fn recover_from_fd(
        &self,
        pid: u32,
        fd: u32,
        inode: u64,
        original_path: &str,
    ) -> Result<RecoveredFile, RecoveryError> {
        let proc_fd = PathBuf::from(format!("/proc/{pid}/fd/{fd}"));
        fs::symlink_metadata(&proc_fd).map_err(|source| RecoveryError::FdGone {
            pid,
            fd,
            source,
        })?;

        self.check_capacity()?;

        let dest = self
            .recovery_dir
            .join(recovery_basename(original_path, inode, unix_now()));
        let mut src = File::open(&proc_fd).map_err(|source| RecoveryError::OpenSource {
            path: proc_fd.clone(),
            source,
        })?;
        let recovered = copy_into(&mut src, &dest)?;

        if let Err(error) = write_sidecar(&dest, original_path, pid, fd, inode, recovered.bytes) {
            warn!(
                "failed to write metadata sidecar for {}: {error}",
                dest.display()
            );
        }
        Ok(recovered)
    }

    /// Fallback used when the kernel side could not correlate a live
    /// descriptor: scan /proc for a process still holding `path` open
    /// and recover through the first match.
    pub fn recover_by_path(&self, path: &Path) -> Result<RecoveredFile, RecoveryError> {
        info!("attempting by-path recovery of {}", path.display());
        let holders = procscan::find_by_path(path).map_err(|source| RecoveryError::Enumerate {
            path: PathBuf::from("/proc"),
            source,
        })?;
        let Some(holder) = holders.first() else {
            return Err(RecoveryError::NoOpenFd {
                path: path.to_path_buf(),
            });
        };
        debug!(
            "found {} open descriptor(s) for {}",
            holders.len(),
            path.display()
        );
        self.recover_from_fd(
            holder.pid,
            holder.fd,
            holder.inode,
            &path.to_string_lossy(),
        )
    }

    /// The artifact cap counts content files only; sidecars ride along.
    fn check_capacity(&self) -> Result<(), RecoveryError> {
        let entries =
            fs::read_dir(&self.recovery_dir).map_err(|source| RecoveryError::Enumerate {
                path: self.recovery_dir.clone(),
                source,
            })?;
        let mut count = 0u64;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "meta") {
                continue;
            }
            if entry.file_type().is_ok_and(|t| t.is_file()) {
                count += 1;
            }
        }
        if count >= self.max_files {
            return Err(RecoveryError::CapacityExhausted {
                count,
                max: self.max_files,
            });
        }
        Ok(())
    }
}

/// Compose the artifact basename: `<unix_ts>_<basename>_inode<inode>`,
/// with `unnamed_<inode>` standing in when the original path has no
/// usable final component.
pub fn recovery_basename(original_path: &str, inode: u64, timestamp: u64) -> String {
    let last = original_path.rsplit('/').next().unwrap_or("");
    if original_path.ends_with('/') || last.is_empty() || last == "." {
        format!("{timestamp}_unnamed_{inode}_inode{inode}")
    } else {
        format!("{timestamp}_{last}_inode{inode}")
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Stream `src` into a fresh file at `dest` and flush it to durable
/// storage. A create failure leaves the directory untouched; a copy or
/// sync failure removes the partial file before returning.
fn copy_into(src: &mut impl Read, dest: &Path) -> Result<RecoveredFile, RecoveryError> {
    let mut out = File::create(dest).map_err(|source| RecoveryError::Create {
        path: dest.to_path_buf(),
        source,
    })?;
    let bytes = match io::copy(src, &mut out) {
        Ok(bytes) => bytes,
        Err(source) => {
            drop(out);
            let _ = fs::remove_file(dest);
            return Err(RecoveryError::Copy {
                path: dest.to_path_buf(),
                source,
            });
        }
    };
    if let Err(source) = out.sync_all() {
        drop(out);
        let _ = fs::remove_file(dest);
        return Err(RecoveryError::Sync {
            path: dest.to_path_buf(),
            source,
        });
    }
    Ok(RecoveredFile {
        path: dest.to_path_buf(),
        bytes,
    })
}

fn write_sidecar(
    recovery_path: &Path,
    original_path: &str,
    pid: u32,
    fd: u32,
    inode: u64,
    size: u64,
) -> io::Result<()> {
    let meta_path = PathBuf::from(format!("{}.meta", recovery_path.display()));
    let content = format!(
        "Recovery Metadata\n\
         ================\n\
         Original Path: {original_path}\n\
         Recovered At: {}\n\
         Inode: {inode}\n\
         Process ID: {pid}\n\
         File Descriptor: {fd}\n\
         File Size: {size} bytes\n\
         Recovery Path: {}\n",
        Local::now().to_rfc3339(),
        recovery_path.display(),
    );
    fs::write(meta_path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn basename_keeps_final_component() {
        let name = recovery_basename("/var/lib/app/data.db", 1234, 1700000000);
        assert_eq!(name, "1700000000_data.db_inode1234");
    }

    #[test]
    fn basename_falls_back_for_empty_and_dot() {
        assert_eq!(
            recovery_basename("", 7, 100),
            "100_unnamed_7_inode7"
        );
        assert_eq!(
            recovery_basename(".", 7, 100),
            "100_unnamed_7_inode7"
        );
        assert_eq!(
            recovery_basename("/tmp/dir/", 7, 100),
            "100_unnamed_7_inode7"
        );
    }

    #[test]
    fn basename_matches_expected_pattern() {
        let name = recovery_basename("/tmp/report.txt", 42, 1700000000);
        let mut parts = name.splitn(2, '_');
        let ts = parts.next().unwrap();
        assert!(ts.chars().all(|c| c.is_ascii_digit()) && !ts.is_empty());
        let rest = parts.next().unwrap();
        let middle = rest.strip_suffix("_inode42").unwrap();
        assert!(!middle.is_empty());
    }

    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::other("injected copy failure"));
            }
            let n = self.remaining.min(buf.len());
            buf[..n].fill(0x5a);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn copy_failure_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.dat");
        let mut src = FailingReader { remaining: 4096 };
        let err = copy_into(&mut src, &dest).unwrap_err();
        assert!(matches!(err, RecoveryError::Copy { .. }));
        assert!(!dest.exists(), "partial artifact must not survive");
    }

    #[test]
    fn copy_success_reports_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("whole.dat");
        let payload = vec![0x17u8; 8192];
        let mut src = &payload[..];
        let recovered = copy_into(&mut src, &dest).unwrap();
        assert_eq!(recovered.bytes, 8192);
        assert_eq!(fs::read(&dest).unwrap(), payload);
    }

    #[test]
    fn sidecar_carries_original_path_and_inode() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("100_data.db_inode9");
        fs::write(&artifact, b"x").unwrap();
        write_sidecar(&artifact, "/srv/data.db", 321, 4, 9, 1).unwrap();
        let meta = fs::read_to_string(dir.path().join("100_data.db_inode9.meta")).unwrap();
        assert!(meta.contains("Original Path: /srv/data.db"));
        assert!(meta.contains("Inode: 9"));
        assert!(meta.contains("Process ID: 321"));
        assert!(meta.contains("File Descriptor: 4"));
    }

    #[test]
    fn capacity_counts_content_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecoveryEngine::new(dir.path().to_path_buf(), 2);
        engine.check_capacity().unwrap();

        fs::write(dir.path().join("100_a_inode1"), b"x").unwrap();
        fs::write(dir.path().join("100_a_inode1.meta"), b"m").unwrap();
        engine.check_capacity().unwrap();

        fs::write(dir.path().join("101_b_inode2"), b"y").unwrap();
        let err = engine.check_capacity().unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::CapacityExhausted { count: 2, max: 2 }
        ));
    }

    #[test]
    fn no_holder_event_counts_as_failed() {
        let stats = Stats::default();
        let dir = tempfile::tempdir().unwrap();
        let engine = RecoveryEngine::new(dir.path().to_path_buf(), 10);

        let mut event = RecoveryEvent {
            deleting_pid: 100,
            holder_pid: 0,
            holder_fd: 0,
            inode: 5,
            dev: 0,
            file_size: 64,
            filename: [0; 256],
            comm: [0; 16],
        };
        event.filename[..8].copy_from_slice(b"gone.txt");
        engine.handle_event(&event, &stats);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.files_deleted, 1);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.files_recovered, 0);
    }

    #[test]
    fn fd_gone_when_descriptor_missing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecoveryEngine::new(dir.path().to_path_buf(), 10);
        // fd 999999 cannot exist within our own fd table.
        let err = engine
            .recover_from_fd(std::process::id(), 999_999, 1, "/tmp/x")
            .unwrap_err();
        assert!(matches!(err, RecoveryError::FdGone { .. }));
    }

    #[test]
    fn direct_recovery_copies_held_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("victim.dat");
        let payload = vec![0xabu8; 16 * 1024];
        let mut file = File::create(&data).unwrap();
        file.write_all(&payload).unwrap();
        file.sync_all().unwrap();
        let inode = {
            use std::os::unix::fs::MetadataExt;
            file.metadata().unwrap().ino()
        };
        let fd = {
            use std::os::fd::AsRawFd;
            file.as_raw_fd() as u32
        };
        fs::remove_file(&data).unwrap();

        let recovery_dir = tempfile::tempdir().unwrap();
        let engine = RecoveryEngine::new(recovery_dir.path().to_path_buf(), 10);
        let recovered = engine
            .recover_from_fd(std::process::id(), fd, inode, &data.to_string_lossy())
            .unwrap();
        assert_eq!(recovered.bytes, payload.len() as u64);
        assert_eq!(fs::read(&recovered.path).unwrap(), payload);
        drop(file);
    }
}
