//! diskalert user-space agent.
//!
//! Resolves the monitored device, loads and attaches the eBPF probes,
//! then consumes events from the rings: block I/O completions feed the
//! usage threshold watcher, unlink records feed the deleted-open-file
//! recovery engine.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use diskalert::config::Config;
use diskalert::events::{self, BLOCK_RING_PAGES, RECOVERY_RING_PAGES};
use diskalert::loader::{self, LoadedProbes};
use diskalert::recovery::RecoveryEngine;
use diskalert::stats::{self, Stats};
use diskalert::watcher::ThresholdWatcher;
use diskalert::{device, logging, retention};
use diskalert_common::{BlockIoEvent, FdTrackEvent, RecoveryEvent, FD_EVENT_CLOSE};
use log::{debug, info};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::task::JoinHandle;

#[derive(Debug, Parser)]
#[command(
    name = "diskalert",
    about = "Monitor disk usage and take action",
    version
)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(Path::new(logging::LOG_FILE_PATH));

    info!("reading configuration from {}", args.config.display());
    let config = Config::load(&args.config)?;

    let mounted = device::resolve(&config.devicename)?;
    info!(
        "device {} major={} minor={} mounted at {}",
        mounted.device_path,
        mounted.identity.major,
        mounted.identity.minor,
        mounted.mount_point.display()
    );
    info!(
        "usage threshold {}%, action: {}",
        config.diskusage_threshold, config.action
    );

    let image = fs::read(&config.probe_image).with_context(|| {
        format!("failed to read probe image {}", config.probe_image.display())
    })?;
    let LoadedProbes {
        ebpf,
        block_ring,
        tracking_ring,
        recovery_ring,
    } = loader::load(&image, mounted.identity, &config)?;

    let stats = Arc::new(Stats::default());
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let watcher = Arc::new(ThresholdWatcher::new(
        mounted.mount_point.clone(),
        config.diskusage_threshold,
        config.action.clone(),
        config.repeat_action,
    ));
    {
        let watcher = watcher.clone();
        tasks.extend(events::spawn_consumers::<BlockIoEvent, _>(
            block_ring,
            BLOCK_RING_PAGES,
            "block-io",
            move |_event| watcher.on_block_io(),
        )?);
    }

    if config.recovery_enabled {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&config.recovery_dir)
            .with_context(|| {
                format!(
                    "failed to create recovery directory {}",
                    config.recovery_dir.display()
                )
            })?;
        info!(
            "file recovery enabled: dir={} min_size={} max_files={}",
            config.recovery_dir.display(),
            config.recovery_min_size,
            config.recovery_max_files
        );

        let engine = Arc::new(RecoveryEngine::new(
            config.recovery_dir.clone(),
            config.recovery_max_files,
        ));
        {
            let engine = engine.clone();
            let stats = stats.clone();
            tasks.extend(events::spawn_consumers::<RecoveryEvent, _>(
                recovery_ring,
                RECOVERY_RING_PAGES,
                "recovery",
                move |event| engine.handle_event(&event, &stats),
            )?);
        }
        {
            let stats = stats.clone();
            let min_size = config.recovery_min_size;
            tasks.extend(events::spawn_consumers::<FdTrackEvent, _>(
                tracking_ring,
                RECOVERY_RING_PAGES,
                "fd-tracking",
                move |event| on_fd_track(&event, min_size, &stats),
            )?);
        }
        tasks.push(tokio::spawn(retention::run(config.recovery_dir.clone())));
        tasks.push(tokio::spawn(stats::report(stats.clone())));
    } else {
        info!("file recovery is disabled");
    }

    info!("diskalert operational, waiting for shutdown signal");
    wait_for_shutdown().await?;
    info!("shutting down");

    // Stop the ring readers before the probe handle drops so detach does
    // not race in-flight reads.
    for task in &tasks {
        task.abort();
    }
    drop(ebpf);
    Ok(())
}

/// Track open/close records: opens count toward `files_tracked`, and
/// records above the minimum size are echoed at debug level.
fn on_fd_track(event: &FdTrackEvent, min_size: u64, stats: &Stats) {
    if event.event_type != FD_EVENT_CLOSE {
        stats.incr_tracked();
    }
    if event.size > min_size {
        let kind = if event.event_type == FD_EVENT_CLOSE {
            "close"
        } else {
            "open"
        };
        debug!(
            "track {kind}: pid={} fd={} inode={} size={} comm={}",
            event.pid,
            event.fd,
            event.inode,
            event.size,
            events::fixed_str(&event.comm)
        );
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
