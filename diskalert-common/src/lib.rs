//! Common types shared between the eBPF probes and the user-space agent.
//!
//! This crate is `no_std` compatible so it can be used in eBPF programs.
//! The structs here cross the kernel/user boundary and must keep the exact
//! layout the probe side emits: `#[repr(C)]`, little-endian, naturally
//! aligned. Strings are zero-terminated within fixed buffers.

#![no_std]

/// Maximum length of process command name.
pub const COMM_LEN: usize = 16;

/// Command-name buffer length in block I/O records.
pub const BLOCK_COMM_LEN: usize = 32;

/// Filename buffer length in fd-tracking and recovery records.
pub const NAME_LEN: usize = 256;

/// Length of the key in the `monitor_disk` map.
pub const MONITOR_KEY_LEN: usize = 64;

/// `config_map` key: recovery enabled flag (0/1).
pub const CONFIG_KEY_ENABLED: u32 = 0;

/// `config_map` key: minimum tracked file size in bytes.
pub const CONFIG_KEY_MIN_FILE_SIZE: u32 = 1;

/// `FdTrackEvent::event_type`: a descriptor was opened.
pub const FD_EVENT_OPEN: u8 = 0;

/// `FdTrackEvent::event_type`: a descriptor was closed.
pub const FD_EVENT_CLOSE: u8 = 1;

/// Number of low bits holding the minor number in an encoded device id.
pub const DEV_MINOR_BITS: u32 = 20;

/// Build the fixed key under which the monitored device id is published
/// to the `monitor_disk` map: the ASCII bytes `monitor_disk` followed by
/// zero padding.
pub fn monitor_disk_key() -> [u8; MONITOR_KEY_LEN] {
    let mut key = [0u8; MONITOR_KEY_LEN];
    let name = b"monitor_disk";
    key[..name.len()].copy_from_slice(name);
    key
}

/// Record emitted on every block I/O completion on the monitored device.
///
/// Only arrival matters to the threshold watcher; the fields beyond
/// `pid`/`uid` are informational.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockIoEvent {
    /// Process that issued the I/O.
    pub pid: u32,
    /// Owning user.
    pub uid: u32,
    /// Raw kernel device number the I/O completed on.
    pub path_hint: u32,
    /// Probe-internal value, unused by the agent.
    pub value: u32,
    /// Process command name.
    pub comm: [u8; BLOCK_COMM_LEN],
}

/// Record emitted per open/close syscall on files above the configured
/// minimum size.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FdTrackEvent {
    /// Process owning the descriptor.
    pub pid: u32,
    /// Descriptor number.
    pub fd: u32,
    /// Inode of the opened file.
    pub inode: u64,
    /// Kernel device number of the containing filesystem.
    pub dev: u32,
    /// File size at event time.
    pub size: u64,
    /// `FD_EVENT_OPEN` or `FD_EVENT_CLOSE`.
    pub event_type: u8,
    /// Zero-terminated file name.
    pub filename: [u8; NAME_LEN],
    /// Process command name.
    pub comm: [u8; COMM_LEN],
}

/// Record emitted when an unlink of a tracked file is observed.
///
/// `holder_pid`/`holder_fd` are zero when the probe could not correlate a
/// live descriptor for the deleted inode.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RecoveryEvent {
    /// Process performing the unlink.
    pub deleting_pid: u32,
    /// Process still holding the file open, if known.
    pub holder_pid: u32,
    /// Open descriptor number within `holder_pid`, if known.
    pub holder_fd: u32,
    /// Inode of the unlinked file.
    pub inode: u64,
    /// Kernel device number of the containing filesystem.
    pub dev: u32,
    /// File size at unlink time.
    pub file_size: u64,
    /// Zero-terminated original file name.
    pub filename: [u8; NAME_LEN],
    /// Command name of the deleting process.
    pub comm: [u8; COMM_LEN],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for BlockIoEvent {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FdTrackEvent {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for RecoveryEvent {}
