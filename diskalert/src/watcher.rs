//! Disk-usage threshold watcher.
//!
//! Invoked once per block I/O event on the monitored device. Samples the
//! filesystem, compares used blocks against the configured percentage,
//! and spawns the operator's action while the repeat limit allows. A
//! below-threshold sample resets the repeat counter, so a flapping
//! device re-fires.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use log::{error, info, warn};
use nix::sys::statvfs::statvfs;

/// Captured standard output of spawned actions.
pub const ACTION_LOG_PATH: &str = "/var/log/diskalert.log";

/// One filesystem sample, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub avail_blocks: u64,
}

impl DiskUsage {
    pub fn used_blocks(&self) -> u64 {
        self.total_blocks.saturating_sub(self.free_blocks)
    }

    /// Blocks corresponding to `percentage` of the filesystem, rounded
    /// to nearest.
    pub fn threshold_blocks(&self, percentage: u64) -> u64 {
        (self.total_blocks as f64 * percentage as f64 / 100.0).round() as u64
    }
}

/// Outcome of one threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Breached and under the repeat limit: spawn the action.
    Fire,
    /// Breached at the repeat limit: stay silent.
    Silenced,
    /// Below threshold: reset the repeat counter.
    Reset,
}

/// Pure decision function over one sample and the current counter state.
pub fn evaluate(usage: &DiskUsage, percentage: u64, fired: u64, repeat_limit: u64) -> Decision {
    if usage.used_blocks() > usage.threshold_blocks(percentage) {
        if fired < repeat_limit {
            Decision::Fire
        } else {
            Decision::Silenced
        }
    } else {
        Decision::Reset
    }
}

pub struct ThresholdWatcher {
    mount_point: PathBuf,
    percentage: u64,
    action: String,
    repeat_limit: u64,
    fired: Mutex<u64>,
}

impl ThresholdWatcher {
    pub fn new(mount_point: PathBuf, percentage: u64, action: String, repeat_limit: u64) -> Self {
        Self {
            mount_point,
            percentage,
            action,
            repeat_limit,
            fired: Mutex::new(0),
        }
    }

    /// Invoked once per delivered block I/O event. The mutex serialises
    /// invocations so the repeat counter stays coherent.
    pub fn on_block_io(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
        let usage = match sample(&self.mount_point) {
            Ok(usage) => usage,
            Err(error) => {
                warn!(
                    "failed to stat filesystem {}: {error}",
                    self.mount_point.display()
                );
                return;
            }
        };
        match evaluate(&usage, self.percentage, *fired, self.repeat_limit) {
            Decision::Fire => {
                info!(
                    "threshold breached ({} of {} blocks used), performing action: {}",
                    usage.used_blocks(),
                    usage.total_blocks,
                    self.action
                );
                match spawn_action(&self.action, Path::new(ACTION_LOG_PATH)) {
                    Ok(()) => {
                        info!("started background process: {}", self.action);
                        *fired += 1;
                    }
                    Err(error) => error!("failed to start action: {error}"),
                }
            }
            Decision::Silenced => {
                info!(
                    "action already performed {} times, staying silent until usage drops",
                    self.repeat_limit
                );
            }
            Decision::Reset => *fired = 0,
        }
    }
}

fn sample(mount_point: &Path) -> nix::Result<DiskUsage> {
    let fs = statvfs(mount_point)?;
    Ok(DiskUsage {
        total_blocks: fs.blocks() as u64,
        free_blocks: fs.blocks_free() as u64,
        avail_blocks: fs.blocks_available() as u64,
    })
}

/// Spawn the action in the background with stdout captured in `log_path`.
/// The first whitespace-separated token is the executable; the watcher
/// does not wait for completion.
fn spawn_action(action: &str, log_path: &Path) -> io::Result<()> {
    let mut parts = action.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty action"))?;
    let log = File::create(log_path)?;
    Command::new(program)
        .args(parts)
        .stdout(Stdio::from(log))
        .spawn()?;
    Ok(())
}
