//! Block device resolution.
//!
//! Turns an operator-supplied device path into the kernel's
//! `(major, minor)` identity and locates its mount point. The mount table
//! records devices under the name the operator gave at mount time, while
//! the block-device table records canonical kernel names; the resolver
//! preserves both.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use diskalert_common::DEV_MINOR_BITS;
use log::debug;
use thiserror::Error;

const DISKSTATS: &str = "/proc/diskstats";
const MOUNTS: &str = "/proc/mounts";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device '{name}' not found in {DISKSTATS}")]
    DeviceNotFound { name: String },

    #[error("device '{device}' not found in {MOUNTS}")]
    MountNotFound { device: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The kernel's `(major, minor)` pair naming one block device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub major: u32,
    pub minor: u32,
}

impl DeviceIdentity {
    /// Encode as the 64-bit value used as the kernel-side map value:
    /// the minor number in the low 20 bits, the major above it.
    pub fn encode(self) -> u64 {
        (u64::from(self.major) << DEV_MINOR_BITS) | u64::from(self.minor)
    }

    /// Recover both halves from an encoded value.
    pub fn decode(value: u64) -> Self {
        Self {
            major: (value >> DEV_MINOR_BITS) as u32,
            minor: (value & ((1u64 << DEV_MINOR_BITS) - 1)) as u32,
        }
    }
}

/// A resolved, mounted block device.
#[derive(Debug, Clone)]
pub struct MountedDevice {
    pub identity: DeviceIdentity,
    /// Canonical device path after symlink resolution.
    pub device_path: String,
    /// Mount point recorded under the pre-resolution device name.
    pub mount_point: PathBuf,
}

/// Resolve `device_path` into a [`MountedDevice`].
pub fn resolve(device_path: &str) -> Result<MountedDevice, DeviceError> {
    let mount_point = find_mount_point(device_path)?;
    let resolved = resolve_device_link(device_path)?;
    let identity = lookup_device_numbers(&resolved)?;
    debug!(
        "resolved {} -> {} major={} minor={} mount={}",
        device_path,
        resolved,
        identity.major,
        identity.minor,
        mount_point.display()
    );
    Ok(MountedDevice {
        identity,
        device_path: resolved,
        mount_point,
    })
}

/// Follow a symbolic link one level, applying the LVM convention: a
/// relative target beginning with `../` (e.g. `/dev/mapper/vg-lv`
/// pointing at `../dm-2`) becomes `/dev/<basename>`.
fn resolve_device_link(device_path: &str) -> Result<String, DeviceError> {
    let meta = std::fs::symlink_metadata(device_path).map_err(|source| DeviceError::Io {
        path: PathBuf::from(device_path),
        source,
    })?;
    if !meta.file_type().is_symlink() {
        return Ok(device_path.to_string());
    }
    let target = std::fs::read_link(device_path).map_err(|source| DeviceError::Io {
        path: PathBuf::from(device_path),
        source,
    })?;
    Ok(rewrite_link_target(&target.to_string_lossy()))
}

fn rewrite_link_target(target: &str) -> String {
    match target.strip_prefix("../") {
        Some(stripped) => {
            let base = stripped.rsplit('/').next().unwrap_or(stripped);
            format!("/dev/{base}")
        }
        None => target.to_string(),
    }
}

/// Look `device_path` up in the kernel's block-device table by basename.
fn lookup_device_numbers(device_path: &str) -> Result<DeviceIdentity, DeviceError> {
    let file = File::open(DISKSTATS).map_err(|source| DeviceError::Io {
        path: PathBuf::from(DISKSTATS),
        source,
    })?;
    parse_diskstats(BufReader::new(file), device_path)
}

fn parse_diskstats<R: BufRead>(reader: R, device_path: &str) -> Result<DeviceIdentity, DeviceError> {
    let name = device_path.strip_prefix("/dev/").unwrap_or(device_path);
    for line in reader.lines() {
        let line = line.map_err(|source| DeviceError::Io {
            path: PathBuf::from(DISKSTATS),
            source,
        })?;
        let mut fields = line.split_whitespace();
        let (Some(major), Some(minor), Some(entry)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if entry != name {
            continue;
        }
        let (Ok(major), Ok(minor)) = (major.parse::<u32>(), minor.parse::<u32>()) else {
            continue;
        };
        return Ok(DeviceIdentity { major, minor });
    }
    Err(DeviceError::DeviceNotFound {
        name: name.to_string(),
    })
}

/// Find the mount point recorded for `device_path` in the mount table.
/// The match is against the original operator-supplied name, not the
/// resolved one.
fn find_mount_point(device_path: &str) -> Result<PathBuf, DeviceError> {
    let file = File::open(MOUNTS).map_err(|source| DeviceError::Io {
        path: PathBuf::from(MOUNTS),
        source,
    })?;
    parse_mounts(BufReader::new(file), device_path)
}

fn parse_mounts<R: BufRead>(reader: R, device_path: &str) -> Result<PathBuf, DeviceError> {
    for line in reader.lines() {
        let line = line.map_err(|source| DeviceError::Io {
            path: PathBuf::from(MOUNTS),
            source,
        })?;
        let mut fields = line.split_whitespace();
        if fields.next() == Some(device_path) {
            if let Some(mount_point) = fields.next() {
                return Ok(PathBuf::from(mount_point));
            }
        }
    }
    Err(DeviceError::MountNotFound {
        device: device_path.to_string(),
    })
}
