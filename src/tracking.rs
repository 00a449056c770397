// src/tracking.rs
use nalgebra::Vector3;
use tracing::{debug, error, info, trace, warn};

use crate::config::{FilterConfig, SessionConfig};
use crate::error::{MocapError, Result};
use crate::joints::{JointType, TrackingState, JOINT_COUNT};
use crate::kalman::JointKalman;
use crate::source::FrameSource;
use crate::tilt::TiltCompensation;

/// One lazily created filter per joint slot.
#[derive(Debug, Default)]
pub struct FilterBank {
    filters: [Option<JointKalman>; JOINT_COUNT],
    config: Option<FilterConfig>,
}

impl FilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session: every slot is emptied and `config` is shared by the
    /// filters created from now on.
    pub fn open(&mut self, config: FilterConfig) -> Result<()> {
        config.validate()?;
        self.clear();
        self.config = Some(config);
        Ok(())
    }

    /// Drop every filter. Safe to call with no open session.
    pub fn close(&mut self) {
        self.clear();
        self.config = None;
    }

    pub fn is_open(&self) -> bool {
        self.config.is_some()
    }

    /// Filter one raw position for `joint`.
    ///
    /// The first measurement of a joint seeds its filter and is returned
    /// unchanged.
    pub fn process(&mut self, joint: JointType, position: Vector3<f64>) -> Result<Vector3<f64>> {
        let config = self.config.ok_or(MocapError::NoActiveSession)?;

        if let Some(filter) = self.filters[joint.index()].as_mut() {
            return filter
                .filtered_state(position.x, position.y, position.z)
                .map_err(|e| match e {
                    MocapError::SingularInnovation { .. } => {
                        MocapError::SingularInnovation { joint: Some(joint) }
                    }
                    other => other,
                });
        }

        let mut filter = JointKalman::from_config(&config)?;
        filter.init(position.x, position.y, position.z);
        self.filters[joint.index()] = Some(filter);
        debug!(joint = %joint, "joint filter created");
        Ok(position)
    }

    pub fn filter(&self, joint: JointType) -> Option<&JointKalman> {
        self.filters[joint.index()].as_ref()
    }

    /// Forget one joint; its next measurement seeds a fresh filter.
    pub fn reset_joint(&mut self, joint: JointType) {
        self.filters[joint.index()] = None;
    }

    pub fn active_joints(&self) -> impl Iterator<Item = JointType> + '_ {
        JointType::ALL
            .into_iter()
            .filter(move |joint| self.filters[joint.index()].is_some())
    }

    fn clear(&mut self) {
        for slot in self.filters.iter_mut() {
            *slot = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredJoint {
    pub joint: JointType,
    pub state: TrackingState,
    pub raw: Vector3<f64>,
    /// Raw position after tilt correction.
    pub corrected: Vector3<f64>,
    /// `None` when the joint was not fed to its filter this frame.
    pub filtered: Option<Vector3<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    pub index: u64,
    pub tilt: f64,
    pub joints: Vec<FilteredJoint>,
}

impl FrameResult {
    pub fn joint(&self, joint: JointType) -> Option<&FilteredJoint> {
        self.joints.iter().find(|j| j.joint == joint)
    }
}

/// A tracking session: the frame source, the floor tilt measured on its
/// first frame, and the per-joint filters.
pub struct MocapSession<S: FrameSource> {
    config: SessionConfig,
    source: S,
    bank: FilterBank,
    tilt: Option<TiltCompensation>,
    frame_index: u64,
    is_open: bool,
    faulted: bool,
}

impl<S: FrameSource> MocapSession<S> {
    pub fn new(config: SessionConfig, source: S) -> Self {
        Self {
            config,
            source,
            bank: FilterBank::new(),
            tilt: None,
            frame_index: 0,
            is_open: false,
            faulted: false,
        }
    }

    /// Open the source and start filtering.
    ///
    /// Returns `Ok(false)` when the source could not be opened; the session
    /// stays closed and the caller may retry.
    pub fn open(&mut self) -> Result<bool> {
        if self.is_open {
            return Err(MocapError::SessionAlreadyOpen);
        }
        self.config.filter.validate()?;

        if let Err(e) = self.source.open() {
            warn!(error = %e, "failed to open frame source");
            return Ok(false);
        }

        self.bank.open(self.config.filter)?;
        self.tilt = None;
        self.frame_index = 0;
        self.faulted = false;
        self.is_open = true;

        info!(
            dt = self.config.filter.dt,
            sensor_noise = self.config.filter.sensor_noise,
            accel_noise = self.config.filter.accel_noise,
            "tracking session opened"
        );
        Ok(true)
    }

    pub fn close(&mut self) {
        if !self.is_open {
            return;
        }
        self.bank.close();
        self.source.close();
        self.tilt = None;
        self.is_open = false;
        info!(frames = self.frame_index, "tracking session closed");
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    /// Tilt in use, zero until the first frame has been polled or a tilt
    /// was set explicitly.
    pub fn tilt(&self) -> TiltCompensation {
        self.tilt.unwrap_or_default()
    }

    /// Override the floor tilt for the rest of the session. An explicit tilt
    /// is applied even when `tilt_correction` is off.
    pub fn set_tilt(&mut self, tilt: TiltCompensation) {
        self.tilt = Some(tilt);
    }

    /// Tilt-correct and filter one raw joint position.
    ///
    /// Fixes the session tilt if none was measured yet, so a later `poll`
    /// does not switch coordinate frames under existing filters.
    pub fn process_frame(&mut self, joint: JointType, x: f64, y: f64, z: f64) -> Result<Vector3<f64>> {
        self.check_ready()?;
        if self.tilt.is_none() {
            self.tilt = Some(TiltCompensation::default());
        }
        let corrected = self.correct(Vector3::new(x, y, z));
        self.filter_corrected(joint, corrected)
    }

    /// Pull the next frame from the source and filter every joint in it.
    /// Returns `Ok(None)` once the source is exhausted.
    pub fn poll(&mut self) -> Result<Option<FrameResult>> {
        self.check_ready()?;

        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };

        if self.tilt.is_none() {
            self.tilt = Some(if self.config.tilt_correction {
                TiltCompensation::from_floor_plane(frame.floor_plane)
            } else {
                TiltCompensation::default()
            });
        }

        let mut result = FrameResult {
            index: self.frame_index,
            tilt: self.tilt().angle(),
            joints: Vec::with_capacity(frame.joints.len()),
        };

        for (joint, raw) in frame.joints {
            let corrected = self.correct(raw.position);
            let filtered = if self.config.require_tracked && raw.state != TrackingState::Tracked {
                trace!(joint = %joint, state = ?raw.state, "joint not tracked, skipping filter");
                None
            } else {
                Some(self.filter_corrected(joint, corrected)?)
            };
            result.joints.push(FilteredJoint {
                joint,
                state: raw.state,
                raw: raw.position,
                corrected,
                filtered,
            });
        }

        self.frame_index += 1;
        Ok(Some(result))
    }

    /// Zero unless measured with `tilt_correction` on, or set explicitly.
    fn correct(&self, raw: Vector3<f64>) -> Vector3<f64> {
        self.tilt().apply(raw)
    }

    fn check_ready(&self) -> Result<()> {
        if !self.is_open {
            return Err(MocapError::NoActiveSession);
        }
        if self.faulted {
            return Err(MocapError::SessionFaulted);
        }
        Ok(())
    }

    fn filter_corrected(&mut self, joint: JointType, corrected: Vector3<f64>) -> Result<Vector3<f64>> {
        self.check_ready()?;
        self.bank.process(joint, corrected).map_err(|e| {
            if matches!(e, MocapError::SingularInnovation { .. }) {
                error!(joint = %joint, error = %e, "numeric failure, session faulted");
                self.faulted = true;
            }
            e
        })
    }
}

impl<S: FrameSource> Drop for MocapSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::RawJoint;
    use crate::source::{RawFrame, ReplaySource};
    use approx::assert_relative_eq;
    use nalgebra::{Vector4, Vector6};

    const DT: f64 = 1.0 / 30.0;

    fn filter_config() -> FilterConfig {
        FilterConfig {
            dt: DT,
            ..FilterConfig::default()
        }
    }

    fn session_config(tilt_correction: bool) -> SessionConfig {
        SessionConfig {
            filter: filter_config(),
            tilt_correction,
            require_tracked: true,
            output_directory: std::env::temp_dir(),
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn open(&mut self) -> Result<()> {
            Err(MocapError::Source("no sensor attached".to_string()))
        }

        fn close(&mut self) {}

        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            Ok(None)
        }
    }

    #[test]
    fn first_measurement_passes_through() {
        let mut bank = FilterBank::new();
        bank.open(filter_config()).unwrap();

        let p = Vector3::new(0.1234, -0.5, 2.25);
        assert_eq!(bank.process(JointType::HandLeft, p).unwrap(), p);

        let filter = bank.filter(JointType::HandLeft).unwrap();
        assert_eq!(*filter.state(), Vector6::new(0.1234, -0.5, 2.25, 0.0, 0.0, 0.0));
        assert!(bank.filter(JointType::HandRight).is_none());
        assert_eq!(bank.active_joints().collect::<Vec<_>>(), vec![JointType::HandLeft]);
    }

    #[test]
    fn second_measurement_is_filtered() {
        let mut bank = FilterBank::new();
        bank.open(filter_config()).unwrap();

        bank.process(JointType::Head, Vector3::new(0.0, 0.0, 0.0)).unwrap();
        let out = bank.process(JointType::Head, Vector3::new(0.1, 0.0, 0.0)).unwrap();
        assert!(out.x > 0.0 && out.x < 0.1);
    }

    #[test]
    fn process_without_session_is_an_error() {
        let mut bank = FilterBank::new();
        assert!(matches!(
            bank.process(JointType::Head, Vector3::zeros()),
            Err(MocapError::NoActiveSession)
        ));

        bank.open(filter_config()).unwrap();
        bank.close();
        bank.close();
        assert!(!bank.is_open());
        assert!(bank.process(JointType::Head, Vector3::zeros()).is_err());
    }

    #[test]
    fn reopening_clears_every_slot() {
        let mut bank = FilterBank::new();
        bank.open(filter_config()).unwrap();
        for joint in JointType::ALL {
            bank.process(joint, Vector3::new(1.0, 1.0, 1.0)).unwrap();
        }
        assert_eq!(bank.active_joints().count(), JOINT_COUNT);

        bank.open(filter_config()).unwrap();
        assert_eq!(bank.active_joints().count(), 0);

        let p = Vector3::new(2.0, 2.0, 2.0);
        assert_eq!(bank.process(JointType::Neck, p).unwrap(), p);
    }

    #[test]
    fn reset_joint_reseeds() {
        let mut bank = FilterBank::new();
        bank.open(filter_config()).unwrap();
        bank.process(JointType::KneeLeft, Vector3::zeros()).unwrap();
        bank.reset_joint(JointType::KneeLeft);

        let p = Vector3::new(0.3, 0.3, 0.3);
        assert_eq!(bank.process(JointType::KneeLeft, p).unwrap(), p);
    }

    #[test]
    fn bank_rejects_invalid_config() {
        let mut bank = FilterBank::new();
        let config = FilterConfig {
            dt: 0.0,
            ..FilterConfig::default()
        };
        assert!(matches!(bank.open(config), Err(MocapError::InvalidConfig { .. })));
        assert!(!bank.is_open());
    }

    #[test]
    fn constant_velocity_joint_is_tracked() {
        let mut bank = FilterBank::new();
        bank.open(filter_config()).unwrap();

        let mut out = Vector3::zeros();
        for frame in 0..=300 {
            let raw = Vector3::new(0.01 * frame as f64, 0.0, 0.0);
            out = bank.process(JointType::SpineBase, raw).unwrap();
            if frame > 150 {
                assert!((raw.x - out.x).abs() < filter_config().sensor_noise.sqrt());
            }
        }

        let filter = bank.filter(JointType::SpineBase).unwrap();
        assert_relative_eq!(filter.velocity().x, 0.3, max_relative = 0.1);
        assert_relative_eq!(out.x, 3.0, epsilon = 0.01);
    }

    #[test]
    fn session_open_reports_source_failure() {
        let mut session = MocapSession::new(session_config(true), FailingSource);
        assert!(!session.open().unwrap());
        assert!(!session.is_open());
        assert!(matches!(
            session.process_frame(JointType::Head, 0.0, 0.0, 0.0),
            Err(MocapError::NoActiveSession)
        ));
    }

    #[test]
    fn session_cannot_be_opened_twice() {
        let mut session = MocapSession::new(session_config(true), ReplaySource::from_frames(vec![]));
        assert!(session.open().unwrap());
        assert!(matches!(session.open(), Err(MocapError::SessionAlreadyOpen)));

        session.close();
        session.close();
        assert!(session.open().unwrap());
    }

    #[test]
    fn poll_measures_tilt_on_first_frame() {
        let tilt = 0.2_f64;
        let (s, c) = tilt.sin_cos();
        let frame = |y: f64, floor: Option<Vector4<f64>>| RawFrame {
            floor_plane: floor,
            joints: vec![(JointType::Head, RawJoint::tracked(0.1, y, 2.0))],
        };
        let frames = vec![
            frame(0.5, Some(Vector4::new(0.0, c, s, 1.0))),
            frame(0.5, Some(Vector4::new(0.0, 1.0, 0.0, 1.0))),
        ];

        let mut session = MocapSession::new(session_config(true), ReplaySource::from_frames(frames));
        assert!(session.open().unwrap());

        let first = session.poll().unwrap().unwrap();
        assert_relative_eq!(first.tilt, tilt, epsilon = 1e-12);
        let head = first.joint(JointType::Head).unwrap();
        let expected = TiltCompensation::from_angle(tilt).apply(Vector3::new(0.1, 0.5, 2.0));
        assert_relative_eq!(head.corrected, expected, epsilon = 1e-12);
        assert_eq!(head.filtered, Some(head.corrected));

        // Later floor planes do not change the session tilt.
        let second = session.poll().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert_relative_eq!(second.tilt, tilt, epsilon = 1e-12);

        assert!(session.poll().unwrap().is_none());
    }

    #[test]
    fn direct_processing_pins_the_session_tilt() {
        let frames = vec![RawFrame {
            floor_plane: Some(Vector4::new(0.0, 0.8, 0.6, 1.0)),
            joints: vec![(JointType::Head, RawJoint::tracked(0.0, 0.5, 2.0))],
        }];
        let mut session = MocapSession::new(session_config(true), ReplaySource::from_frames(frames));
        session.open().unwrap();

        session.process_frame(JointType::Head, 0.0, 0.5, 2.0).unwrap();
        let result = session.poll().unwrap().unwrap();

        assert_eq!(result.tilt, 0.0);
        assert_eq!(session.tilt().angle(), 0.0);
        let head = result.joint(JointType::Head).unwrap();
        assert_eq!(head.corrected, Vector3::new(0.0, 0.5, 2.0));
        assert_relative_eq!(head.filtered.unwrap(), Vector3::new(0.0, 0.5, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn explicit_tilt_applies_without_floor_correction() {
        let mut session = MocapSession::new(session_config(false), ReplaySource::from_frames(vec![]));
        session.open().unwrap();
        let tilt = TiltCompensation::from_angle(0.3);
        session.set_tilt(tilt);

        let out = session.process_frame(JointType::Neck, 0.1, 0.4, 2.0).unwrap();
        assert_eq!(out, tilt.apply(Vector3::new(0.1, 0.4, 2.0)));
    }

    #[test]
    fn tilt_disabled_keeps_raw_coordinates() {
        let frames = vec![RawFrame {
            floor_plane: Some(Vector4::new(0.0, 0.9, 0.4, 1.0)),
            joints: vec![(JointType::Head, RawJoint::tracked(0.1, 0.5, 2.0))],
        }];
        let mut session = MocapSession::new(session_config(false), ReplaySource::from_frames(frames));
        session.open().unwrap();

        let result = session.poll().unwrap().unwrap();
        assert_eq!(result.tilt, 0.0);
        assert_eq!(result.joints[0].corrected, Vector3::new(0.1, 0.5, 2.0));
    }

    #[test]
    fn untracked_joints_skip_their_filter() {
        let inferred = RawJoint {
            position: Vector3::new(0.0, 0.0, 2.0),
            state: TrackingState::Inferred,
        };
        let frames = vec![RawFrame {
            floor_plane: None,
            joints: vec![
                (JointType::HandLeft, inferred),
                (JointType::Head, RawJoint::tracked(0.0, 0.5, 2.0)),
            ],
        }];
        let mut session = MocapSession::new(session_config(true), ReplaySource::from_frames(frames));
        session.open().unwrap();

        let result = session.poll().unwrap().unwrap();
        assert_eq!(result.joint(JointType::HandLeft).unwrap().filtered, None);
        assert!(result.joint(JointType::Head).unwrap().filtered.is_some());
        assert!(session.bank().filter(JointType::HandLeft).is_none());
    }

    #[test]
    fn numeric_failure_faults_the_session() {
        let mut config = session_config(false);
        config.filter.sensor_noise = 0.0;
        config.filter.accel_noise = 0.0;

        let mut session = MocapSession::new(config, ReplaySource::from_frames(vec![]));
        session.open().unwrap();
        session.process_frame(JointType::Head, 0.0, 0.0, 0.0).unwrap();

        let err = session.process_frame(JointType::Head, 0.1, 0.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            MocapError::SingularInnovation { joint: Some(JointType::Head) }
        ));
        assert!(session.is_faulted());
        assert!(matches!(
            session.process_frame(JointType::Neck, 0.0, 0.0, 0.0),
            Err(MocapError::SessionFaulted)
        ));

        session.close();
        assert!(session.open().unwrap());
        assert!(!session.is_faulted());
    }
}
