//! Artifact retention.
//!
//! A background task wakes hourly and removes recovery files older than
//! the maximum age. Subdirectories are skipped and individual removal
//! failures never halt the sweep.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{info, warn};

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Artifacts older than this are reclaimed.
pub const MAX_ARTIFACT_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// True when a file modified at `modified` has outlived `max_age` as of
/// `now`. Files with timestamps in the future never expire.
pub fn is_expired(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age > max_age,
        Err(_) => false,
    }
}

/// Remove regular files under `dir` older than `max_age`. Returns the
/// number of files removed.
pub fn sweep_once(dir: &Path, max_age: Duration, now: SystemTime) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if !is_expired(modified, now, max_age) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => {
                warn!(
                    "failed to remove old recovery file {}: {error}",
                    path.display()
                );
            }
        }
    }
    if removed > 0 {
        info!("cleaned up {removed} old recovery files");
    }
    Ok(removed)
}

/// Background sweep over `dir` at [`SWEEP_INTERVAL`].
pub async fn run(dir: PathBuf) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(error) = sweep_once(&dir, MAX_ARTIFACT_AGE, SystemTime::now()) {
            warn!("retention sweep of {} failed: {error}", dir.display());
        }
    }
}
