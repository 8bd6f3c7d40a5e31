//! Throughput of the camera streams.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Frame counters and the number of open devices over all streaming sessions.
#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    annotated_frames: AtomicU64,
    failed_frames: AtomicU64,
    open_sessions: AtomicU64,
}

/// Counts taken from a [`Meter`] since the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterSnapshot {
    pub captured: u64,
    pub annotated: u64,
    pub failed: u64,
    pub open_sessions: u64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            annotated_frames: AtomicU64::new(0),
            failed_frames: AtomicU64::new(0),
            open_sessions: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_annotated(&self) {
        self.annotated_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A captured frame that could not be annotated or encoded.
    pub fn tick_failed(&self) {
        self.failed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.open_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_released(&self) {
        // Saturate so an unbalanced release cannot wrap the gauge
        let _ = self
            .open_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn open_sessions(&self) -> u64 {
        self.open_sessions.load(Ordering::Relaxed)
    }

    /// Read and reset the frame counters. The session gauge is not reset.
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            captured: self.captured_frames.swap(0, Ordering::Relaxed),
            annotated: self.annotated_frames.swap(0, Ordering::Relaxed),
            failed: self.failed_frames.swap(0, Ordering::Relaxed),
            open_sessions: self.open_sessions(),
        }
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;
        let mut last_open = 0;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let snapshot = METER.snapshot();
            let elapsed = start.elapsed().as_secs_f32();

            if snapshot.open_sessions != last_open {
                log::info!("Open camera sessions: {}", snapshot.open_sessions);
                last_open = snapshot.open_sessions;
            }
            if snapshot.captured > 0 {
                log::info!(
                    "Captured {:.2} fps, annotated {:.2} fps",
                    snapshot.captured as f32 / elapsed,
                    snapshot.annotated as f32 / elapsed
                );
            }
            if snapshot.failed > 0 {
                log::warn!("{} frame(s) failed in the last {:.1}s", snapshot.failed, elapsed);
            }
        }
    })
}
