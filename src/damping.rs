//! Rayleigh damping calibration

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

/// Stiffness matrix the stiffness-proportional term follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DampingStiffness {
    /// Initial stiffness
    Initial,
    /// Current tangent stiffness
    Current,
}

/// Requested damping: ratio and the two calibration modes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DampingSpec {
    /// Target damping ratio (0.05 for 5%)
    pub ratio: f64,
    /// Zero-based indices of the two calibration modes
    pub modes: [usize; 2],
    /// Stiffness used for the stiffness-proportional term
    pub stiffness: DampingStiffness,
}

impl Default for DampingSpec {
    fn default() -> Self {
        Self {
            ratio: 0.05,
            modes: [0, 2],
            stiffness: DampingStiffness::Initial,
        }
    }
}

impl DampingSpec {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            ..Self::default()
        }
    }

    /// Set the calibration modes
    pub fn with_modes(mut self, first: usize, second: usize) -> Self {
        self.modes = [first, second];
        self
    }

    /// Make the stiffness term follow the current tangent
    pub fn with_current_stiffness(mut self) -> Self {
        self.stiffness = DampingStiffness::Current;
        self
    }

    /// Number of eigenvalues needed to calibrate
    pub fn modes_required(&self) -> usize {
        self.modes[0].max(self.modes[1]) + 1
    }
}

/// Rayleigh coefficients, fixed for one transient run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayleighDamping {
    /// Mass-proportional coefficient (α)
    pub mass_proportional: f64,
    /// Coefficient on the initial stiffness
    pub stiffness_initial: f64,
    /// Coefficient on the current stiffness
    pub stiffness_current: f64,
}

impl RayleighDamping {
    /// Calibrate from the solver's eigenvalues (ω², ascending)
    pub fn from_eigenvalues(eigenvalues: &[f64], spec: &DampingSpec) -> DriverResult<Self> {
        let pick = |mode: usize| -> DriverResult<f64> {
            let value = *eigenvalues.get(mode).ok_or_else(|| {
                DriverError::InvalidInput(format!(
                    "damping mode {} requested but only {} eigenvalues available",
                    mode,
                    eigenvalues.len()
                ))
            })?;
            if value <= 0.0 || !value.is_finite() {
                return Err(DriverError::InvalidInput(format!(
                    "eigenvalue of mode {} is not positive: {}",
                    mode, value
                )));
            }
            Ok(value.sqrt())
        };

        let w1 = pick(spec.modes[0])?;
        let w2 = pick(spec.modes[1])?;
        Ok(Self::from_frequencies(w1, w2, spec.ratio, spec.stiffness))
    }

    /// Calibrate from two circular frequencies
    pub fn from_frequencies(w1: f64, w2: f64, ratio: f64, stiffness: DampingStiffness) -> Self {
        let alpha = 2.0 * ratio * w1 * w2 / (w1 + w2);
        let beta = 2.0 * ratio / (w1 + w2);
        match stiffness {
            DampingStiffness::Initial => Self {
                mass_proportional: alpha,
                stiffness_initial: beta,
                stiffness_current: 0.0,
            },
            DampingStiffness::Current => Self {
                mass_proportional: alpha,
                stiffness_initial: 0.0,
                stiffness_current: beta,
            },
        }
    }

    /// Damping ratio this calibration gives at circular frequency `w`
    pub fn ratio_at(&self, w: f64) -> f64 {
        let beta = self.stiffness_initial + self.stiffness_current;
        self.mass_proportional / (2.0 * w) + beta * w / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_calibration_hits_target_at_both_modes() {
        let eig = [100.0, 900.0, 2500.0];
        let spec = DampingSpec::new(0.03);
        let d = RayleighDamping::from_eigenvalues(&eig, &spec).unwrap();
        assert_relative_eq!(d.ratio_at(10.0), 0.03, epsilon = 1e-12);
        assert_relative_eq!(d.ratio_at(50.0), 0.03, epsilon = 1e-12);
        assert_eq!(d.stiffness_current, 0.0);
    }

    #[test]
    fn test_current_stiffness_switch() {
        let d = RayleighDamping::from_frequencies(10.0, 50.0, 0.05, DampingStiffness::Current);
        assert_eq!(d.stiffness_initial, 0.0);
        assert_relative_eq!(d.stiffness_current, 0.1 / 60.0, epsilon = 1e-15);
        assert_relative_eq!(d.mass_proportional, 0.1 * 500.0 / 60.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_mode_is_rejected() {
        let spec = DampingSpec::new(0.05).with_modes(0, 2);
        assert!(RayleighDamping::from_eigenvalues(&[4.0, 9.0], &spec).is_err());
        assert_eq!(spec.modes_required(), 3);
    }
}
