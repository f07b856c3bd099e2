//! ---
//! nest_section: "11-simulation-test-harness"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Synthetic fiducial marker detector."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use nest_common::config::VisionSettings;
use nest_core::{MarkerDetection, VisionDetector};
use parking_lot::Mutex;
use rand::prelude::*;
use tracing::{debug, info};

/// Roughly 30 frames per second.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

const FIELD_HALF_WIDTH_M: f64 = 1.5;
const MAX_MARKERS_PER_FRAME: usize = 3;

/// Number of marker ids in an ArUco dictionary such as `DICT_4X4_50`.
pub fn dictionary_size(name: &str) -> Result<u32> {
    if name == "DICT_ARUCO_ORIGINAL" {
        return Ok(1024);
    }
    let body = name
        .strip_prefix("DICT_")
        .with_context(|| format!("unknown ArUco dictionary {name}"))?;
    let (grid, count) = body
        .split_once('_')
        .with_context(|| format!("unknown ArUco dictionary {name}"))?;
    if !matches!(grid, "4X4" | "5X5" | "6X6" | "7X7") {
        bail!("unsupported ArUco grid {grid} in {name}");
    }
    match count {
        "50" | "100" | "250" | "1000" => Ok(count.parse()?),
        other => bail!("unsupported ArUco dictionary size {other} in {name}"),
    }
}

/// Produces random marker sightings at a fixed frame rate until stopped.
#[derive(Debug)]
pub struct SimDetector {
    dictionary: String,
    marker_ids: u32,
    marker_size_m: f64,
    frame_interval: Duration,
    stop: AtomicBool,
    frames: AtomicU64,
    latest: Mutex<Vec<MarkerDetection>>,
    rng: Mutex<StdRng>,
}

impl SimDetector {
    pub fn new(vision: &VisionSettings, frame_interval: Duration, seed: u64) -> Result<Self> {
        if let Some(index) = vision.camera_index {
            if index < 0 {
                bail!("camera index {index} is negative");
            }
        }
        if vision.marker_size_m.is_nan() || vision.marker_size_m <= 0.0 {
            bail!("marker size must be positive, got {}", vision.marker_size_m);
        }
        let marker_ids = dictionary_size(&vision.aruco_dict_name)?;
        Ok(Self {
            dictionary: vision.aruco_dict_name.clone(),
            marker_ids,
            marker_size_m: vision.marker_size_m,
            frame_interval,
            stop: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            latest: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    fn detect_frame(&self) -> Vec<MarkerDetection> {
        let mut rng = self.rng.lock();
        let count = rng.gen_range(0..=MAX_MARKERS_PER_FRAME);
        let captured_at = Utc::now();
        (0..count)
            .map(|_| MarkerDetection {
                marker_id: rng.gen_range(0..self.marker_ids),
                position_m: [
                    rng.gen_range(-FIELD_HALF_WIDTH_M..FIELD_HALF_WIDTH_M),
                    rng.gen_range(-FIELD_HALF_WIDTH_M..FIELD_HALF_WIDTH_M),
                    self.marker_size_m / 2.0,
                ],
                captured_at,
            })
            .collect()
    }
}

impl VisionDetector for SimDetector {
    fn run(&self) -> Result<()> {
        info!(dictionary = %self.dictionary, "detector capture loop started");
        while !self.stop.load(Ordering::SeqCst) {
            thread::sleep(self.frame_interval);
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let detections = self.detect_frame();
            self.frames.fetch_add(1, Ordering::SeqCst);
            *self.latest.lock() = detections;
        }
        debug!(frames = self.frames_processed(), "detector capture loop finished");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detections(&self) -> Vec<MarkerDetection> {
        self.latest.lock().clone()
    }
}
