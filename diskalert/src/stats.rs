//! Process-wide recovery counters.
//!
//! Counters only ever increase; the reporter reads a consistent snapshot
//! under the read half of the lock.

use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;

use log::info;

/// Cadence of the periodic stats report.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// A consistent view of all counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub files_tracked: u64,
    pub files_deleted: u64,
    pub files_recovered: u64,
    pub files_failed: u64,
    pub total_bytes_recovered: u64,
}

#[derive(Debug, Default)]
pub struct Stats {
    inner: RwLock<Snapshot>,
}

impl Stats {
    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn incr_tracked(&self) {
        self.write().files_tracked += 1;
    }

    pub fn incr_deleted(&self) {
        self.write().files_deleted += 1;
    }

    pub fn incr_recovered(&self, bytes: u64) {
        let mut snapshot = self.write();
        snapshot.files_recovered += 1;
        snapshot.total_bytes_recovered += bytes;
    }

    pub fn incr_failed(&self) {
        self.write().files_failed += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Background task logging a snapshot at [`REPORT_INTERVAL`].
pub async fn report(stats: Arc<Stats>) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let s = stats.snapshot();
        info!(
            "recovery stats: tracked={} deleted={} recovered={} failed={} bytes={}",
            s.files_tracked, s.files_deleted, s.files_recovered, s.files_failed,
            s.total_bytes_recovered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::default();
        stats.incr_tracked();
        stats.incr_tracked();
        stats.incr_deleted();
        stats.incr_recovered(4096);
        stats.incr_recovered(1024);
        stats.incr_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.files_tracked, 2);
        assert_eq!(snapshot.files_deleted, 1);
        assert_eq!(snapshot.files_recovered, 2);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.total_bytes_recovered, 5120);
    }

    #[test]
    fn counters_never_decrease_across_interleavings() {
        let stats = Arc::new(Stats::default());
        let mut previous = stats.snapshot();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.incr_deleted();
                        stats.incr_recovered(1);
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            let current = stats.snapshot();
            assert!(current.files_deleted >= previous.files_deleted);
            assert!(current.files_recovered >= previous.files_recovered);
            assert!(current.total_bytes_recovered >= previous.total_bytes_recovered);
            previous = current;
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let final_snapshot = stats.snapshot();
        assert_eq!(final_snapshot.files_deleted, 400);
        assert_eq!(final_snapshot.total_bytes_recovered, 400);
    }
}
