// src/data.rs
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use nalgebra::Vector3;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::joints::JointType;
use crate::tracking::FrameResult;

#[derive(Debug, Serialize)]
struct JointRecord {
    frame: u64,
    joint: &'static str,
    state: u8,
    raw_x: f64,
    raw_y: f64,
    raw_z: f64,
    corrected_x: f64,
    corrected_y: f64,
    corrected_z: f64,
    filtered_x: Option<f64>,
    filtered_y: Option<f64>,
    filtered_z: Option<f64>,
}

/// Per-joint smoothness statistics over a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JointSummary {
    pub samples: usize,
    /// Mean frame-to-frame displacement of the tilt-corrected input.
    pub raw_jitter: f64,
    /// Mean frame-to-frame displacement of the filtered output.
    pub filtered_jitter: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub frames: usize,
    pub tilt_rad: f64,
    pub joints: BTreeMap<JointType, JointSummary>,
}

pub struct DataExporter {
    output_dir: PathBuf,
    session_name: String,
    frames: Vec<FrameResult>,
}

impl DataExporter {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            frames: Vec::new(),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    pub fn add_frame(&mut self, frame: FrameResult) {
        self.frames.push(frame);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self.session_dir().join("filtered_joints.csv");
        std::fs::create_dir_all(self.session_dir())?;

        let file = File::create(&csv_path)?;
        let mut writer = Writer::from_writer(file);

        for frame in &self.frames {
            for joint in &frame.joints {
                writer.serialize(JointRecord {
                    frame: frame.index,
                    joint: joint.joint.name(),
                    state: joint.state.code(),
                    raw_x: joint.raw.x,
                    raw_y: joint.raw.y,
                    raw_z: joint.raw.z,
                    corrected_x: joint.corrected.x,
                    corrected_y: joint.corrected.y,
                    corrected_z: joint.corrected.z,
                    filtered_x: joint.filtered.map(|p| p.x),
                    filtered_y: joint.filtered.map(|p| p.y),
                    filtered_z: joint.filtered.map(|p| p.z),
                })?;
            }
        }

        writer.flush()?;
        info!(path = %csv_path.display(), frames = self.frames.len(), "filtered joints exported");
        Ok(csv_path)
    }

    pub fn summary(&self) -> SessionSummary {
        let mut last: BTreeMap<JointType, (Vector3<f64>, Vector3<f64>)> = BTreeMap::new();
        let mut joints: BTreeMap<JointType, JointSummary> = BTreeMap::new();

        for frame in &self.frames {
            for joint in &frame.joints {
                let Some(filtered) = joint.filtered else {
                    continue;
                };
                let entry = joints.entry(joint.joint).or_default();
                entry.samples += 1;
                if let Some((prev_raw, prev_filtered)) = last.get(&joint.joint) {
                    entry.raw_jitter += (joint.corrected - prev_raw).norm();
                    entry.filtered_jitter += (filtered - prev_filtered).norm();
                }
                last.insert(joint.joint, (joint.corrected, filtered));
            }
        }

        for summary in joints.values_mut() {
            if summary.samples > 1 {
                let steps = (summary.samples - 1) as f64;
                summary.raw_jitter /= steps;
                summary.filtered_jitter /= steps;
            }
        }

        SessionSummary {
            session: self.session_name.clone(),
            frames: self.frames.len(),
            tilt_rad: self.frames.first().map_or(0.0, |f| f.tilt),
            joints,
        }
    }

    pub fn export_summary(&self) -> Result<PathBuf> {
        let path = self.session_dir().join("summary.json");
        std::fs::create_dir_all(self.session_dir())?;
        std::fs::write(&path, serde_json::to_string_pretty(&self.summary())?)?;
        Ok(path)
    }
}
