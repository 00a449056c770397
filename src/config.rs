// src/config.rs
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MocapError, Result};

pub const DEFAULT_FPS: f64 = 24.0;
pub const MIN_FPS: f64 = 1.0;
pub const MAX_FPS: f64 = 60.0;

/// Parameters shared by every joint filter in a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Seconds per frame.
    pub dt: f64,
    /// Measurement variance.
    pub sensor_noise: f64,
    /// Commanded acceleration magnitude.
    pub control: f64,
    /// Acceleration noise standard deviation.
    pub accel_noise: f64,
    /// Re-symmetrize the covariance after every update.
    pub symmetrize: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / DEFAULT_FPS,
            sensor_noise: 0.0005,
            control: 0.0,
            accel_noise: 3.0,
            symmetrize: false,
        }
    }
}

impl FilterConfig {
    pub fn with_fps(fps: f64) -> Result<Self> {
        if !fps.is_finite() || !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(MocapError::InvalidConfig {
                field: "fps",
                value: fps,
                reason: "must be between 1 and 60",
            });
        }
        Ok(Self {
            dt: 1.0 / fps,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(MocapError::InvalidConfig {
                field: "dt",
                value: self.dt,
                reason: "must be positive and finite",
            });
        }
        check_non_negative("sensor_noise", self.sensor_noise)?;
        check_non_negative("accel_noise", self.accel_noise)?;
        if !self.control.is_finite() {
            return Err(MocapError::InvalidConfig {
                field: "control",
                value: self.control,
                reason: "must be finite",
            });
        }
        Ok(())
    }
}

pub(crate) fn check_non_negative(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MocapError::InvalidConfig {
            field,
            value,
            reason: "must be non-negative and finite",
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub filter: FilterConfig,
    /// Rotate joints by the floor tilt measured on the first frame.
    pub tilt_correction: bool,
    /// Only feed fully tracked joints to the filters.
    pub require_tracked: bool,
    pub output_directory: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            tilt_correction: true,
            require_tracked: true,
            output_directory: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("MocapFilter")))
                .unwrap_or_else(|| PathBuf::from("./output")),
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.filter.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }
}
