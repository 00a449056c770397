// src/error.rs
use thiserror::Error;

use crate::joints::JointType;

pub type Result<T> = std::result::Result<T, MocapError>;

#[derive(Debug, Error)]
pub enum MocapError {
    /// A filter or session parameter is outside its valid range.
    #[error("invalid configuration: {field} = {value} ({reason})")]
    InvalidConfig {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// The innovation covariance could not be inverted during an update.
    #[error("innovation covariance is singular for joint {joint:?}")]
    SingularInnovation { joint: Option<JointType> },

    #[error("no tracking session is open")]
    NoActiveSession,

    #[error("a tracking session is already open")]
    SessionAlreadyOpen,

    #[error("tracking session faulted after a numeric failure; close it and reopen")]
    SessionFaulted,

    #[error("unknown joint name: {0}")]
    UnknownJoint(String),

    #[error("joint index {0} is out of range (0..25)")]
    JointOutOfRange(usize),

    #[error("unknown tracking state: {0}")]
    UnknownTrackingState(u8),

    /// The frame source (device, recording) failed.
    #[error("frame source error: {0}")]
    Source(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
