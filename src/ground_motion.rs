//! Ground-motion records

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

/// Acceleration record sampled at a fixed time step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundMotion {
    /// Sampling interval of the record
    pub dt: f64,
    /// Acceleration samples, one per `dt`
    pub values: Vec<f64>,
    /// Scale factor applied to every sample (includes unit conversion)
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_factor() -> f64 {
    1.0
}

impl GroundMotion {
    /// Create a record; `dt` must be positive and there must be samples
    pub fn new(dt: f64, values: Vec<f64>) -> DriverResult<Self> {
        if !(dt > 0.0) {
            return Err(DriverError::InvalidInput(format!(
                "record time step must be positive, got {}",
                dt
            )));
        }
        if values.is_empty() {
            return Err(DriverError::InvalidInput("record has no samples".to_string()));
        }
        Ok(Self {
            dt,
            values,
            factor: 1.0,
        })
    }

    /// Re-check a record that did not come through [`GroundMotion::new`],
    /// e.g. one deserialized from a job file
    pub fn validate(&self) -> DriverResult<()> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(DriverError::InvalidInput(format!(
                "record time step must be positive, got {}",
                self.dt
            )));
        }
        if self.values.is_empty() {
            return Err(DriverError::InvalidInput("record has no samples".to_string()));
        }
        if !self.factor.is_finite() || self.values.iter().any(|v| !v.is_finite()) {
            return Err(DriverError::InvalidInput(
                "record factor and samples must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the scale factor
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Copy of this record with a different scale factor
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            factor,
            ..self.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Record duration, `dt * number of samples`
    pub fn duration(&self) -> f64 {
        self.dt * self.values.len() as f64
    }

    /// Scaled acceleration at time `t`, linearly interpolated.
    ///
    /// Zero before the record starts and after its last sample, which is what
    /// makes a free-vibration tail possible.
    pub fn acceleration_at(&self, t: f64) -> f64 {
        if t < 0.0 || self.values.is_empty() || !(self.dt > 0.0) {
            return 0.0;
        }
        let position = t / self.dt;
        let i = position.floor() as usize;
        if i + 1 >= self.values.len() {
            if i + 1 == self.values.len() && (position - i as f64).abs() < 1e-12 {
                return self.factor * self.values[i];
            }
            return 0.0;
        }
        let frac = position - i as f64;
        self.factor * (self.values[i] * (1.0 - frac) + self.values[i + 1] * frac)
    }

    /// Peak absolute scaled acceleration
    pub fn peak(&self) -> f64 {
        self.values
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
            * self.factor.abs()
    }
}
