//! Kernel ABI layout checks.
//!
//! The event structs cross the kernel/user boundary; their sizes and
//! field offsets must match the probe-side definitions exactly, so they
//! are pinned here by value rather than by type name.

use std::mem::{offset_of, size_of};

use diskalert::device::DeviceIdentity;
use diskalert_common::{
    monitor_disk_key, BlockIoEvent, FdTrackEvent, RecoveryEvent, BLOCK_COMM_LEN, COMM_LEN,
    MONITOR_KEY_LEN, NAME_LEN,
};

#[test]
fn block_io_event_layout() {
    assert_eq!(size_of::<BlockIoEvent>(), 48);
    assert_eq!(offset_of!(BlockIoEvent, pid), 0);
    assert_eq!(offset_of!(BlockIoEvent, uid), 4);
    assert_eq!(offset_of!(BlockIoEvent, path_hint), 8);
    assert_eq!(offset_of!(BlockIoEvent, value), 12);
    assert_eq!(offset_of!(BlockIoEvent, comm), 16);
    assert_eq!(BLOCK_COMM_LEN, 32);
}

#[test]
fn fd_track_event_layout() {
    assert_eq!(size_of::<FdTrackEvent>(), 312);
    assert_eq!(offset_of!(FdTrackEvent, pid), 0);
    assert_eq!(offset_of!(FdTrackEvent, fd), 4);
    assert_eq!(offset_of!(FdTrackEvent, inode), 8);
    assert_eq!(offset_of!(FdTrackEvent, dev), 16);
    assert_eq!(offset_of!(FdTrackEvent, size), 24);
    assert_eq!(offset_of!(FdTrackEvent, event_type), 32);
    assert_eq!(offset_of!(FdTrackEvent, filename), 33);
    assert_eq!(offset_of!(FdTrackEvent, comm), 289);
    assert_eq!(NAME_LEN, 256);
    assert_eq!(COMM_LEN, 16);
}

#[test]
fn recovery_event_layout() {
    assert_eq!(size_of::<RecoveryEvent>(), 312);
    assert_eq!(offset_of!(RecoveryEvent, deleting_pid), 0);
    assert_eq!(offset_of!(RecoveryEvent, holder_pid), 4);
    assert_eq!(offset_of!(RecoveryEvent, holder_fd), 8);
    assert_eq!(offset_of!(RecoveryEvent, inode), 16);
    assert_eq!(offset_of!(RecoveryEvent, dev), 24);
    assert_eq!(offset_of!(RecoveryEvent, file_size), 32);
    assert_eq!(offset_of!(RecoveryEvent, filename), 40);
    assert_eq!(offset_of!(RecoveryEvent, comm), 296);
}

#[test]
fn monitor_disk_key_is_name_then_zero_padding() {
    let key = monitor_disk_key();
    assert_eq!(key.len(), MONITOR_KEY_LEN);
    assert_eq!(&key[..12], b"monitor_disk");
    assert!(key[12..].iter().all(|&b| b == 0));
}

#[test]
fn device_identity_matches_kernel_packing() {
    let identity = DeviceIdentity { major: 8, minor: 1 };
    assert_eq!(identity.encode(), (8u64 << 20) | 1);
    assert_eq!(DeviceIdentity::decode((253u64 << 20) | 7).major, 253);
    assert_eq!(DeviceIdentity::decode((253u64 << 20) | 7).minor, 7);
}
