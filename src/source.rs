// src/source.rs
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use nalgebra::{Vector3, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MocapError, Result};
use crate::joints::{JointType, RawJoint, TrackingState};

/// One body frame as captured by the sensor.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Floor plane `(x, y, z, w)`, when the sensor could see it.
    pub floor_plane: Option<Vector4<f64>>,
    pub joints: Vec<(JointType, RawJoint)>,
}

/// Anything that can deliver skeleton frames: a live sensor, a recording,
/// a simulation.
pub trait FrameSource {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    /// `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

#[derive(Debug, Deserialize)]
struct ReplayRow {
    frame: u64,
    joint: String,
    x: f64,
    y: f64,
    z: f64,
    #[serde(default = "tracked_code")]
    state: u8,
    #[serde(default)]
    floor_x: Option<f64>,
    #[serde(default)]
    floor_y: Option<f64>,
    #[serde(default)]
    floor_z: Option<f64>,
    #[serde(default)]
    floor_w: Option<f64>,
}

fn tracked_code() -> u8 {
    TrackingState::Tracked.code()
}

impl ReplayRow {
    fn floor_plane(&self) -> Option<Vector4<f64>> {
        Some(Vector4::new(
            self.floor_x?,
            self.floor_y?,
            self.floor_z?,
            self.floor_w.unwrap_or(0.0),
        ))
    }
}

/// Plays back a recorded capture.
///
/// CSV columns: `frame,joint,x,y,z,state` plus optional
/// `floor_x,floor_y,floor_z,floor_w`. Consecutive rows sharing a `frame`
/// value form one frame.
pub struct ReplaySource {
    path: Option<PathBuf>,
    frames: VecDeque<RawFrame>,
    is_open: bool,
}

impl ReplaySource {
    pub fn from_csv(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            frames: VecDeque::new(),
            is_open: false,
        }
    }

    pub fn from_frames(frames: Vec<RawFrame>) -> Self {
        Self {
            path: None,
            frames: frames.into(),
            is_open: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    fn load(path: &Path) -> Result<VecDeque<RawFrame>> {
        if !path.exists() {
            return Err(MocapError::Source(format!(
                "recording does not exist: {}",
                path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut frames = VecDeque::new();
        let mut current: Option<(u64, RawFrame)> = None;

        for row in reader.deserialize() {
            let row: ReplayRow = row?;
            let joint: JointType = row.joint.parse()?;
            let raw = RawJoint {
                position: Vector3::new(row.x, row.y, row.z),
                state: TrackingState::from_code(row.state)?,
            };

            match current.as_mut() {
                Some((frame, pending)) if *frame == row.frame => {
                    if pending.floor_plane.is_none() {
                        pending.floor_plane = row.floor_plane();
                    }
                    pending.joints.push((joint, raw));
                    continue;
                }
                _ => {}
            }

            if let Some((_, done)) = current.take() {
                frames.push_back(done);
            }
            current = Some((
                row.frame,
                RawFrame {
                    floor_plane: row.floor_plane(),
                    joints: vec![(joint, raw)],
                },
            ));
        }
        if let Some((_, done)) = current {
            frames.push_back(done);
        }

        Ok(frames)
    }
}

impl FrameSource for ReplaySource {
    fn open(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            self.frames = Self::load(path)?;
            info!(path = %path.display(), frames = self.frames.len(), "recording loaded");
        }
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.is_open = false;
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if !self.is_open {
            return Err(MocapError::Source("replay source is not open".to_string()));
        }
        Ok(self.frames.pop_front())
    }
}

/// Rest pose of a standing subject roughly two metres in front of the sensor.
const REST_POSE: [[f64; 3]; 25] = [
    [0.00, -0.30, 2.00], // SpineBase
    [0.00, 0.00, 2.00],  // SpineMid
    [0.00, 0.40, 2.00],  // Neck
    [0.00, 0.55, 2.00],  // Head
    [-0.18, 0.30, 2.00], // ShoulderLeft
    [-0.25, 0.05, 2.00], // ElbowLeft
    [-0.28, -0.18, 1.98], // WristLeft
    [-0.29, -0.25, 1.97], // HandLeft
    [0.18, 0.30, 2.00],  // ShoulderRight
    [0.25, 0.05, 2.00],  // ElbowRight
    [0.28, -0.18, 1.98], // WristRight
    [0.29, -0.25, 1.97], // HandRight
    [-0.10, -0.35, 2.00], // HipLeft
    [-0.11, -0.75, 2.02], // KneeLeft
    [-0.12, -1.15, 2.05], // AnkleLeft
    [-0.12, -1.20, 1.95], // FootLeft
    [0.10, -0.35, 2.00], // HipRight
    [0.11, -0.75, 2.02], // KneeRight
    [0.12, -1.15, 2.05], // AnkleRight
    [0.12, -1.20, 1.95], // FootRight
    [0.00, 0.32, 2.00],  // SpineShoulder
    [-0.30, -0.33, 1.96], // HandTipLeft
    [-0.25, -0.24, 1.95], // ThumbLeft
    [0.30, -0.33, 1.96], // HandTipRight
    [0.25, -0.24, 1.95], // ThumbRight
];

/// Deterministic synthetic skeleton: arms swing on sines, every joint gets
/// seeded uniform noise, and the sensor is pitched by a fixed tilt.
pub struct SimulatedSource {
    rng: StdRng,
    seed: u64,
    dt: f64,
    frames: u64,
    frame: u64,
    noise_amplitude: f64,
    floor_tilt: f64,
    is_open: bool,
}

impl SimulatedSource {
    pub fn new(dt: f64, frames: u64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            dt,
            frames,
            frame: 0,
            noise_amplitude: 0.02,
            floor_tilt: 0.1,
            is_open: false,
        }
    }

    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    pub fn with_floor_tilt(mut self, angle: f64) -> Self {
        self.floor_tilt = angle;
        self
    }

    /// Noise-free position of `joint` at time `t`, in the level frame.
    pub fn true_position(joint: JointType, t: f64) -> Vector3<f64> {
        let rest = REST_POSE[joint.index()];
        let mut p = Vector3::new(rest[0], rest[1], rest[2]);

        let swing = match joint {
            JointType::ElbowLeft | JointType::ElbowRight => 0.5,
            JointType::WristLeft
            | JointType::WristRight
            | JointType::HandLeft
            | JointType::HandRight
            | JointType::HandTipLeft
            | JointType::HandTipRight
            | JointType::ThumbLeft
            | JointType::ThumbRight => 1.0,
            _ => 0.0,
        };
        let phase = if joint.name().ends_with("Right") { 1.5 } else { 0.0 };
        p.y += 0.10 * swing * (t + phase).sin();
        p.z -= 0.15 * swing * (0.5 * t + phase).cos();
        p
    }

    fn tilted(&self, p: Vector3<f64>) -> Vector3<f64> {
        // Sensor pitched by `floor_tilt`: the inverse of the correction rotation.
        let (s, c) = self.floor_tilt.sin_cos();
        Vector3::new(p.x, p.y * c - p.z * s, p.z * c + p.y * s)
    }
}

impl FrameSource for SimulatedSource {
    fn open(&mut self) -> Result<()> {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.frame = 0;
        self.is_open = true;
        debug!(frames = self.frames, seed = self.seed, "simulated source opened");
        Ok(())
    }

    fn close(&mut self) {
        self.is_open = false;
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if !self.is_open {
            return Err(MocapError::Source("simulated source is not open".to_string()));
        }
        if self.frame >= self.frames {
            return Ok(None);
        }

        let t = self.frame as f64 * self.dt;
        self.frame += 1;

        let a = self.noise_amplitude;
        let mut joints = Vec::with_capacity(JointType::ALL.len());
        for joint in JointType::ALL {
            let mut p = self.tilted(Self::true_position(joint, t));
            if a > 0.0 {
                p += Vector3::new(
                    self.rng.gen_range(-a..a),
                    self.rng.gen_range(-a..a),
                    self.rng.gen_range(-a..a),
                );
            }
            joints.push((
                joint,
                RawJoint {
                    position: p,
                    state: TrackingState::Tracked,
                },
            ));
        }

        let (s, c) = self.floor_tilt.sin_cos();
        Ok(Some(RawFrame {
            floor_plane: Some(Vector4::new(0.0, c, s, 1.0)),
            joints,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replay_groups_rows_by_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "frame,joint,x,y,z,state,floor_x,floor_y,floor_z,floor_w").unwrap();
        writeln!(file, "0,Head,0.0,0.5,2.0,2,0.0,0.99,0.1,1.2").unwrap();
        writeln!(file, "0,HandLeft,-0.3,-0.2,2.0,1,,,,").unwrap();
        writeln!(file, "1,Head,0.0,0.51,2.0,2,,,,").unwrap();
        drop(file);

        let mut source = ReplaySource::from_csv(&path);
        source.open().unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.joints.len(), 2);
        assert_eq!(first.joints[1].0, JointType::HandLeft);
        assert_eq!(first.joints[1].1.state, TrackingState::Inferred);
        assert_eq!(first.floor_plane, Some(Vector4::new(0.0, 0.99, 0.1, 1.2)));

        let second = source.next_frame().unwrap().unwrap();
        assert!(second.floor_plane.is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn replay_state_column_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.csv");
        std::fs::write(&path, "frame,joint,x,y,z\n0,3,0.0,0.5,2.0\n").unwrap();

        let mut source = ReplaySource::from_csv(&path);
        source.open().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.joints[0].0, JointType::Head);
        assert_eq!(frame.joints[0].1.state, TrackingState::Tracked);
    }

    #[test]
    fn missing_recording_fails_to_open() {
        let mut source = ReplaySource::from_csv("/definitely/not/here.csv");
        assert!(matches!(source.open(), Err(MocapError::Source(_))));
    }

    #[test]
    fn closed_source_refuses_frames() {
        let mut source = ReplaySource::from_frames(vec![RawFrame::default()]);
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn simulation_is_reproducible() {
        let mut a = SimulatedSource::new(1.0 / 30.0, 5, 11);
        let mut b = SimulatedSource::new(1.0 / 30.0, 5, 11);
        a.open().unwrap();
        b.open().unwrap();
        for _ in 0..5 {
            let fa = a.next_frame().unwrap().unwrap();
            let fb = b.next_frame().unwrap().unwrap();
            assert_eq!(fa.joints.len(), 25);
            for (ja, jb) in fa.joints.iter().zip(fb.joints.iter()) {
                assert_eq!(ja.1.position, jb.1.position);
            }
        }
        assert!(a.next_frame().unwrap().is_none());
    }
}
