//! Result types for analysis procedures

use serde::{Deserialize, Serialize};

use crate::damping::RayleighDamping;
use crate::error::{DriverError, DriverResult};
use crate::recorder::{ResponseSeries, StepRows};
use crate::removal::TrackedElementPair;

/// Why a procedure stopped early
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Every fallback was tried without convergence
    NonConvergence,
    /// A response query failed after a converged step
    ResponseQuery(String),
}

/// Terminal state of a procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcedureStatus {
    /// All planned steps converged
    Completed,
    /// Stopped at `step`, after reaching `control_value`
    Aborted {
        step: usize,
        control_value: f64,
        reason: AbortReason,
    },
}

/// Everything a procedure run produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    /// Procedure label
    pub procedure: String,
    /// Completed or aborted
    pub status: ProcedureStatus,
    /// Steps that converged
    pub steps_completed: usize,
    /// Steps planned
    pub total_steps: usize,
    /// Recorded series, `steps_completed + 1` rows
    pub series: ResponseSeries,
    /// Sorted steps at which strut pairs failed
    pub failure_steps: Vec<usize>,
    /// Final state of every strut pair
    pub pairs: Vec<TrackedElementPair>,
    /// Steps that needed a fallback to converge
    pub recovered_steps: usize,
    /// Rayleigh coefficients used by a transient run
    pub damping: Option<RayleighDamping>,
    /// First-mode period after a transient run
    pub final_period: Option<f64>,
    /// Mean per-story drift over the free-vibration tail
    pub residual_drift: Option<Vec<f64>>,
    /// Relative plus ground acceleration for transient runs
    pub absolute_acceleration: Option<StepRows>,
}

impl AnalysisOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == ProcedureStatus::Completed
    }

    pub fn is_aborted(&self) -> bool {
        !self.is_completed()
    }

    /// Last control value reached
    pub fn last_control_value(&self) -> Option<f64> {
        match self.status {
            ProcedureStatus::Aborted { control_value, .. } => Some(control_value),
            ProcedureStatus::Completed => self.series.control.last().copied(),
        }
    }

    /// Turn an aborted outcome into [`DriverError::ProcedureAbort`]
    pub fn into_result(self) -> DriverResult<Self> {
        if self.is_completed() {
            Ok(self)
        } else {
            Err(DriverError::ProcedureAbort(Box::new(self)))
        }
    }

    /// Control displacement against base shear from an element group.
    ///
    /// Base shear is minus the sum of `component` of each element's force
    /// vector, i.e. the reaction at their lower ends.
    pub fn capacity_curve(&self, track: &str, component: usize) -> Option<CapacityCurve> {
        let track = self.series.track(track)?;
        let base_shear = (0..self.series.len())
            .map(|row| {
                -track
                    .values
                    .iter()
                    .map(|rows| rows[row].get(component).copied().unwrap_or(0.0))
                    .sum::<f64>()
            })
            .collect();
        Some(CapacityCurve {
            displacement: self.series.control.clone(),
            base_shear,
        })
    }
}

/// Pushover capacity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityCurve {
    /// Control displacement
    pub displacement: Vec<f64>,
    /// Base shear
    pub base_shear: Vec<f64>,
}

impl CapacityCurve {
    /// Roof drift in percent and base shear coefficient V/W
    pub fn normalized(&self, height: f64, weight: f64) -> CapacityCurve {
        CapacityCurve {
            displacement: self.displacement.iter().map(|d| d / height * 100.0).collect(),
            base_shear: self.base_shear.iter().map(|v| v / weight).collect(),
        }
    }

    /// Peak base shear and the displacement where it occurs
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.base_shear
            .iter()
            .zip(&self.displacement)
            .max_by(|a, b| a.0.abs().total_cmp(&b.0.abs()))
            .map(|(&v, &d)| (d, v))
    }
}
