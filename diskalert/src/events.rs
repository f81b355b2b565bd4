//! Ring consumption and wire decoding.
//!
//! Each ring is drained by one task per online CPU. The consumer holds
//! only the ring; business logic lives in the handler it dispatches to.
//! Lost samples and undecodable records are logged and skipped, never
//! fatal.

use std::mem;
use std::time::Duration;

use anyhow::Result;
use aya::maps::perf::AsyncPerfEventArray;
use aya::maps::MapData;
use aya::util::online_cpus;
use aya::Pod;
use bytes::BytesMut;
use log::warn;
use tokio::task::JoinHandle;

/// Per-CPU page count for the fd-tracking and recovery rings.
pub const RECOVERY_RING_PAGES: usize = 4;

/// Per-CPU page count for the block I/O ring.
pub const BLOCK_RING_PAGES: usize = 1;

/// Buffers handed to each `read_events` call.
const EVENTS_PER_READ: usize = 10;

/// Decode one fixed-layout record from a raw sample. Returns `None` when
/// the sample is shorter than the record.
pub fn decode<T: Pod>(buf: &[u8]) -> Option<T> {
    if buf.len() < mem::size_of::<T>() {
        return None;
    }
    Some(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast()) })
}

/// Render a zero-terminated fixed buffer as a string, truncating at the
/// first zero byte.
pub fn fixed_str(buf: &[u8]) -> String {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).to_string()
}

/// Spawn one reader task per online CPU over `array`, dispatching every
/// decoded record to `handler`. Returns the task handles so shutdown can
/// abort the readers before the probe handles drop.
pub fn spawn_consumers<T, F>(
    mut array: AsyncPerfEventArray<MapData>,
    pages: usize,
    ring: &'static str,
    handler: F,
) -> Result<Vec<JoinHandle<()>>>
where
    T: Pod + Send + 'static,
    F: Fn(T) + Clone + Send + Sync + 'static,
{
    let cpus = online_cpus().map_err(|(_, error)| error)?;
    let mut tasks = Vec::with_capacity(cpus.len());
    for cpu_id in cpus {
        let mut buf = array.open(cpu_id, Some(pages))?;
        let handler = handler.clone();
        tasks.push(tokio::spawn(async move {
            let mut buffers = (0..EVENTS_PER_READ)
                .map(|_| BytesMut::with_capacity(mem::size_of::<T>() + 1024))
                .collect::<Vec<_>>();
            loop {
                match buf.read_events(&mut buffers).await {
                    Ok(events) => {
                        if events.lost > 0 {
                            warn!("{ring} ring full, dropped {} samples", events.lost);
                        }
                        for buffer in buffers.iter().take(events.read) {
                            match decode::<T>(buffer) {
                                Some(event) => handler(event),
                                None => warn!(
                                    "{ring} ring: short record ({} bytes, expected {})",
                                    buffer.len(),
                                    mem::size_of::<T>()
                                ),
                            }
                        }
                    }
                    Err(error) => {
                        warn!("{ring} ring read failed: {error}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }));
    }
    Ok(tasks)
}
