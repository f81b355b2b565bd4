//! Probe loading and attachment.
//!
//! Loads the pre-compiled probe object, publishes the monitored device
//! and the recovery configuration to the kernel-side maps, and attaches
//! every hook point. The returned [`LoadedProbes`] owns the probe handles;
//! dropping it detaches all probes, whichever unlink hook ended up
//! installed.

use anyhow::{Context, Result};
use aya::maps::perf::AsyncPerfEventArray;
use aya::maps::{HashMap, MapData};
use aya::programs::{KProbe, TracePoint};
use aya::Ebpf;
use aya_log::EbpfLogger;
use diskalert_common::{
    monitor_disk_key, CONFIG_KEY_ENABLED, CONFIG_KEY_MIN_FILE_SIZE, MONITOR_KEY_LEN,
};
use log::{debug, info, warn};

use crate::config::Config;
use crate::device::DeviceIdentity;

/// Loaded and attached probes plus the rings they feed.
pub struct LoadedProbes {
    /// Probe handle. Keep alive for the process lifetime; dropping it
    /// detaches every attached program.
    pub ebpf: Ebpf,
    /// Block I/O completions on the monitored device.
    pub block_ring: AsyncPerfEventArray<MapData>,
    /// Open/close descriptor tracking records.
    pub tracking_ring: AsyncPerfEventArray<MapData>,
    /// Unlink records for the recovery engine.
    pub recovery_ring: AsyncPerfEventArray<MapData>,
}

/// Load the probe image, configure its maps for `identity` and the
/// recovery settings in `config`, and attach all hook points.
pub fn load(image: &[u8], identity: DeviceIdentity, config: &Config) -> Result<LoadedProbes> {
    raise_memlock_limit()?;

    let mut ebpf = Ebpf::load(image).context("failed to load probe image")?;
    if let Err(error) = EbpfLogger::init(&mut ebpf) {
        debug!("probe logger unavailable: {error}");
    }

    let mut monitor: HashMap<_, [u8; MONITOR_KEY_LEN], u64> = HashMap::try_from(
        ebpf.map_mut("monitor_disk")
            .context("map monitor_disk missing from probe image")?,
    )?;
    monitor.insert(monitor_disk_key(), identity.encode(), 0)?;

    let mut config_map: HashMap<_, u32, u64> = HashMap::try_from(
        ebpf.map_mut("config_map")
            .context("map config_map missing from probe image")?,
    )?;
    config_map.insert(CONFIG_KEY_ENABLED, u64::from(config.recovery_enabled), 0)?;
    config_map.insert(CONFIG_KEY_MIN_FILE_SIZE, config.recovery_min_size, 0)?;

    attach_block_probes(&mut ebpf)?;
    attach_tracking_probes(&mut ebpf)?;
    attach_unlink_probe(&mut ebpf)?;

    let block_ring = take_ring(&mut ebpf, "output")?;
    let tracking_ring = take_ring(&mut ebpf, "tracking_events")?;
    let recovery_ring = take_ring(&mut ebpf, "recovery_events")?;

    Ok(LoadedProbes {
        ebpf,
        block_ring,
        tracking_ring,
        recovery_ring,
    })
}

/// Probe maps are locked memory; lift the limit before loading.
fn raise_memlock_limit() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("failed to raise RLIMIT_MEMLOCK");
    }
    Ok(())
}

fn tracepoint<'a>(ebpf: &'a mut Ebpf, name: &str) -> Result<&'a mut TracePoint> {
    let program = ebpf
        .program_mut(name)
        .with_context(|| format!("program {name} missing from probe image"))?
        .try_into()?;
    Ok(program)
}

fn attach_block_probes(ebpf: &mut Ebpf) -> Result<()> {
    let program = tracepoint(ebpf, "bpf_traceblock")?;
    program.load()?;
    program
        .attach("block", "block_bio_complete")
        .context("failed to attach block_bio_complete tracepoint")?;
    program
        .attach("block", "block_rq_complete")
        .context("failed to attach block_rq_complete tracepoint")?;
    info!("attached block I/O tracepoints");
    Ok(())
}

fn attach_tracking_probes(ebpf: &mut Ebpf) -> Result<()> {
    let openat = tracepoint(ebpf, "trace_openat_exit")?;
    openat.load()?;
    openat
        .attach("syscalls", "sys_exit_openat")
        .context("failed to attach openat tracepoint")?;
    info!("attached tracepoint to sys_exit_openat");

    let close = tracepoint(ebpf, "trace_close_entry")?;
    close.load()?;
    close
        .attach("syscalls", "sys_enter_close")
        .context("failed to attach close tracepoint")?;
    info!("attached tracepoint to sys_enter_close");
    Ok(())
}

/// Attach the unlink hook: the `vfs_unlink` kprobe when the symbol is
/// available, otherwise the `sys_enter_unlinkat` tracepoint. Failure of
/// the fallback is fatal.
fn attach_unlink_probe(ebpf: &mut Ebpf) -> Result<()> {
    let kprobe: &mut KProbe = ebpf
        .program_mut("kprobe_vfs_unlink")
        .context("program kprobe_vfs_unlink missing from probe image")?
        .try_into()?;
    kprobe.load()?;
    match kprobe.attach("vfs_unlink", 0) {
        Ok(_) => {
            info!("attached kprobe to vfs_unlink");
            Ok(())
        }
        Err(error) => {
            warn!("failed to attach vfs_unlink kprobe: {error}, falling back to sys_enter_unlinkat");
            let fallback = tracepoint(ebpf, "trace_unlinkat_entry")?;
            fallback.load()?;
            fallback
                .attach("syscalls", "sys_enter_unlinkat")
                .context("failed to attach unlinkat tracepoint")?;
            info!("attached tracepoint to sys_enter_unlinkat");
            Ok(())
        }
    }
}

fn take_ring(ebpf: &mut Ebpf, name: &str) -> Result<AsyncPerfEventArray<MapData>> {
    let map = ebpf
        .take_map(name)
        .with_context(|| format!("map {name} missing from probe image"))?;
    let ring = AsyncPerfEventArray::try_from(map)
        .with_context(|| format!("map {name} is not a perf event array"))?;
    Ok(ring)
}
