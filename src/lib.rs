// src/lib.rs
//! Real-time smoothing of body-tracking joint streams.
//!
//! Each of the 25 skeleton joints gets its own constant-velocity Kalman
//! filter, created on the joint's first measurement. Raw positions are
//! rotated by the sensor's floor tilt before filtering.

pub mod config;
pub mod data;
pub mod error;
pub mod joints;
pub mod kalman;
pub mod source;
pub mod tilt;
pub mod tracking;

pub use config::{FilterConfig, SessionConfig};
pub use error::{MocapError, Result};
pub use joints::{JointType, RawJoint, TrackingState};
pub use kalman::JointKalman;
pub use source::{FrameSource, RawFrame, ReplaySource, SimulatedSource};
pub use tilt::TiltCompensation;
pub use tracking::{FilterBank, FilteredJoint, FrameResult, MocapSession};
