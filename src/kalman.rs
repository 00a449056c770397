// src/kalman.rs
//! Constant-velocity Kalman filter for a single tracked joint.
//!
//! State: [x, y, z, vx, vy, vz]. Observation: [x, y, z].

use nalgebra::{Matrix3, Matrix3x6, Matrix6, Vector3, Vector6};
use tracing::trace;

use crate::config::FilterConfig;
use crate::error::{MocapError, Result};

pub const DEFAULT_SENSOR_NOISE: f64 = 0.0005;
pub const DEFAULT_CONTROL: f64 = 0.0;
pub const DEFAULT_ACCEL_NOISE: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct JointKalman {
    state: Vector6<f64>,
    covariance: Matrix6<f64>,
    transition: Matrix6<f64>,
    control_input: Vector6<f64>,
    observation: Matrix3x6<f64>,
    process_noise: Matrix6<f64>,
    measurement_noise: Matrix3<f64>,
    control: f64,
    dt: f64,
    symmetrize: bool,
}

impl JointKalman {
    /// Filter with the default sensor noise, no commanded acceleration and
    /// the default acceleration noise.
    pub fn new(dt: f64) -> Result<Self> {
        Self::with_params(dt, DEFAULT_SENSOR_NOISE, DEFAULT_CONTROL, DEFAULT_ACCEL_NOISE)
    }

    pub fn with_params(dt: f64, sensor_noise: f64, control: f64, accel_noise: f64) -> Result<Self> {
        FilterConfig {
            dt,
            sensor_noise,
            control,
            accel_noise,
            symmetrize: false,
        }
        .validate()?;

        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        let mut transition = Matrix6::identity();
        transition.fixed_view_mut::<3, 3>(0, 3).fill_diagonal(dt);

        // Acceleration couples uniformly into every state slot, velocity included.
        let control_input = Vector6::repeat(dt2 / 2.0);

        let mut observation = Matrix3x6::zeros();
        observation.fixed_view_mut::<3, 3>(0, 0).fill_diagonal(1.0);

        let measurement_noise = Matrix3::identity() * sensor_noise;

        let mut process_noise = Matrix6::zeros();
        process_noise.fixed_view_mut::<3, 3>(0, 0).fill_diagonal(dt4 / 4.0);
        process_noise.fixed_view_mut::<3, 3>(0, 3).fill_diagonal(dt3 / 2.0);
        process_noise.fixed_view_mut::<3, 3>(3, 0).fill_diagonal(dt3 / 2.0);
        process_noise.fixed_view_mut::<3, 3>(3, 3).fill_diagonal(dt2);
        process_noise *= accel_noise * accel_noise;

        Ok(Self {
            state: Vector6::zeros(),
            covariance: process_noise,
            transition,
            control_input,
            observation,
            process_noise,
            measurement_noise,
            control,
            dt,
            symmetrize: false,
        })
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut filter =
            Self::with_params(config.dt, config.sensor_noise, config.control, config.accel_noise)?;
        filter.symmetrize = config.symmetrize;
        Ok(filter)
    }

    /// Force `P` back to symmetric after every update.
    pub fn set_symmetrize(&mut self, enabled: bool) {
        self.symmetrize = enabled;
    }

    /// Seed the estimate from a first measurement with zero velocity.
    /// Calling it again resets the state but keeps the covariance.
    pub fn init(&mut self, x: f64, y: f64, z: f64) {
        self.state = Vector6::new(x, y, z, 0.0, 0.0, 0.0);
    }

    pub fn predict(&mut self) {
        self.state = self.transition * self.state + self.control_input * self.control;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
    }

    /// Fold a position measurement into the estimate.
    ///
    /// Fails without touching the estimate when the innovation covariance
    /// `S = C·P·Cᵗ + Ez` has no inverse.
    pub fn update(&mut self, measurement: Vector3<f64>) -> Result<()> {
        let c = &self.observation;
        let s = c * self.covariance * c.transpose() + self.measurement_noise;
        let s_inv = s
            .try_inverse()
            .ok_or(MocapError::SingularInnovation { joint: None })?;

        let gain = self.covariance * c.transpose() * s_inv;
        let innovation = measurement - c * self.state;

        self.state += gain * innovation;
        self.covariance = (Matrix6::identity() - gain * c) * self.covariance;
        if self.symmetrize {
            self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;
        }

        trace!(innovation = innovation.norm(), "kalman update");
        Ok(())
    }

    /// One predict/update cycle; returns the filtered position.
    ///
    /// On failure both the state and the covariance are restored to what
    /// they were before the call.
    pub fn filtered_state(&mut self, x: f64, y: f64, z: f64) -> Result<Vector3<f64>> {
        let saved = (self.state, self.covariance);
        self.predict();
        if let Err(e) = self.update(Vector3::new(x, y, z)) {
            (self.state, self.covariance) = saved;
            return Err(e);
        }
        Ok(self.position())
    }

    pub fn position(&self) -> Vector3<f64> {
        self.state.fixed_rows::<3>(0).into_owned()
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.state.fixed_rows::<3>(3).into_owned()
    }

    pub fn state(&self) -> &Vector6<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &Matrix6<f64> {
        &self.covariance
    }

    pub fn process_noise(&self) -> &Matrix6<f64> {
        &self.process_noise
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}
