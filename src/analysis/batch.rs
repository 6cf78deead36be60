//! Independent procedure batches
//!
//! Incremental dynamic analysis runs the same transient procedure at several
//! intensities. Each run gets its own solver, so runs share nothing and are
//! executed in parallel with Rayon.

use log::info;
use rayon::prelude::*;

use crate::analysis::procedure::{ControlPlan, Procedure};
use crate::error::{DriverError, DriverResult};
use crate::results::AnalysisOutcome;
use crate::solver::Solver;

/// One transient procedure per scale factor, applied on top of the record's own factor
pub fn ida_procedures(base: &Procedure, factors: &[f64]) -> DriverResult<Vec<Procedure>> {
    let ControlPlan::Transient { record, .. } = &base.plan else {
        return Err(DriverError::InvalidInput(format!(
            "incremental dynamic analysis needs a transient procedure, got '{}'",
            base.label
        )));
    };

    factors
        .iter()
        .map(|&factor| {
            if !factor.is_finite() {
                return Err(DriverError::InvalidInput(format!(
                    "scale factor {} is not finite",
                    factor
                )));
            }
            let mut procedure = base.clone();
            if let ControlPlan::Transient { record: scaled, .. } = &mut procedure.plan {
                *scaled = record.scaled(record.factor * factor);
            }
            procedure.label = format!("{}@{}", base.label, factor);
            Ok(procedure)
        })
        .collect()
}

/// Run every procedure against a fresh solver from `make_solver`.
///
/// `make_solver` receives the procedure's index. Results keep the input
/// order; one failing run does not affect the others.
pub fn run_batch<S, F>(procedures: &[Procedure], make_solver: F) -> Vec<DriverResult<AnalysisOutcome>>
where
    S: Solver,
    F: Fn(usize) -> DriverResult<S> + Sync,
{
    info!("Running {} independent procedures", procedures.len());
    procedures
        .par_iter()
        .enumerate()
        .map(|(index, procedure)| {
            let mut solver = make_solver(index)?;
            procedure.run(&mut solver)
        })
        .collect()
}
