//! Brittle strut removal
//!
//! Infill struts come in pairs (one per diagonal). After every converged step
//! the drift between the end nodes of each live pair is compared with its
//! capacity; past it, both struts are removed from the model for good.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};
use crate::recorder::interstory_drift;
use crate::solver::{ElementTag, NodeTag, Solver};

/// Force vector width used when the solver reports an empty vector
const DEFAULT_FORCE_WIDTH: usize = 6;

/// Input description of a strut pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrutPair {
    pub element_a: ElementTag,
    /// Its end nodes define the drift that is checked
    pub element_b: ElementTag,
    /// Absolute drift ratio past which both struts are removed
    pub drift_capacity: f64,
}

impl StrutPair {
    pub fn new(element_a: ElementTag, element_b: ElementTag, drift_capacity: f64) -> Self {
        Self {
            element_a,
            element_b,
            drift_capacity,
        }
    }

    /// Build pairs from element tag pairs and a parallel list of capacities
    pub fn zip(
        elements: &[(ElementTag, ElementTag)],
        capacities: &[f64],
    ) -> DriverResult<Vec<StrutPair>> {
        if elements.len() != capacities.len() {
            return Err(DriverError::InvalidTracking(format!(
                "{} strut pairs but {} drift capacities",
                elements.len(),
                capacities.len()
            )));
        }
        Ok(elements
            .iter()
            .zip(capacities)
            .map(|(&(a, b), &cap)| StrutPair::new(a, b, cap))
            .collect())
    }
}

/// Runtime state of one strut pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedElementPair {
    pub node_i: NodeTag,
    pub node_j: NodeTag,
    pub element_a: ElementTag,
    pub element_b: ElementTag,
    pub drift_capacity: f64,
    /// Flips to false once, never back
    pub alive: bool,
    /// Step at which the capacity was first exceeded
    pub failure_step: Option<usize>,
    y_i: f64,
    y_j: f64,
}

impl TrackedElementPair {
    /// Current drift between the pair's end nodes along `dof`
    pub fn drift<S: Solver + ?Sized>(&self, solver: &S, dof: usize) -> DriverResult<f64> {
        let d_i = solver
            .node_displacement(self.node_i, dof)
            .map_err(DriverError::from_query)?;
        let d_j = solver
            .node_displacement(self.node_j, dof)
            .map_err(DriverError::from_query)?;
        Ok(interstory_drift(d_i, d_j, self.y_i, self.y_j))
    }
}

/// Force readings of one pair at one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairForces {
    pub element_a: ElementTag,
    pub element_b: ElementTag,
    pub force_a: Vec<f64>,
    pub force_b: Vec<f64>,
}

/// Per-step drift check and removal for a set of strut pairs
#[derive(Debug, Clone)]
pub struct RemovalModel {
    pairs: Vec<TrackedElementPair>,
    dof: usize,
    force_width: usize,
}

impl RemovalModel {
    /// Resolve pair geometry from the model.
    ///
    /// `dof` is the lateral DOF and `vertical_axis` the coordinate used as
    /// height. Pairs whose nodes share a height cannot carry a drift.
    pub fn new<S: Solver + ?Sized>(
        pairs: &[StrutPair],
        solver: &S,
        dof: usize,
        vertical_axis: usize,
    ) -> DriverResult<Self> {
        let mut tracked = Vec::with_capacity(pairs.len());
        let mut force_width = DEFAULT_FORCE_WIDTH;

        for (n, pair) in pairs.iter().enumerate() {
            if !(pair.drift_capacity > 0.0) {
                return Err(DriverError::InvalidTracking(format!(
                    "strut pair {} has non-positive drift capacity {}",
                    n, pair.drift_capacity
                )));
            }
            let (node_i, node_j) = solver
                .element_nodes(pair.element_b)
                .map_err(DriverError::from_query)?;
            let y_i = solver
                .node_coordinate(node_i, vertical_axis)
                .map_err(DriverError::from_query)?;
            let y_j = solver
                .node_coordinate(node_j, vertical_axis)
                .map_err(DriverError::from_query)?;
            if (y_j - y_i).abs() < 1e-12 {
                return Err(DriverError::InvalidTracking(format!(
                    "strut {} connects nodes {} and {} at the same height",
                    pair.element_b, node_i, node_j
                )));
            }
            if n == 0 {
                let width = solver
                    .element_force(pair.element_a)
                    .map_err(DriverError::from_query)?
                    .len();
                if width > 0 {
                    force_width = width;
                }
            }
            tracked.push(TrackedElementPair {
                node_i,
                node_j,
                element_a: pair.element_a,
                element_b: pair.element_b,
                drift_capacity: pair.drift_capacity,
                alive: true,
                failure_step: None,
                y_i,
                y_j,
            });
        }

        Ok(Self {
            pairs: tracked,
            dof,
            force_width,
        })
    }

    pub fn pairs(&self) -> &[TrackedElementPair] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Every element tag under removal tracking
    pub fn elements(&self) -> impl Iterator<Item = ElementTag> + '_ {
        self.pairs.iter().flat_map(|p| [p.element_a, p.element_b])
    }

    /// Check every live pair after step `step` and read the pair forces.
    ///
    /// A pair whose drift exceeds its capacity is removed here and already
    /// reports zero forces for this step.
    pub fn check_and_apply<S: Solver + ?Sized>(
        &mut self,
        solver: &mut S,
        step: usize,
    ) -> DriverResult<Vec<PairForces>> {
        for pair in self.pairs.iter_mut().filter(|p| p.alive) {
            let drift = pair.drift(&*solver, self.dof)?;
            if drift.abs() > pair.drift_capacity {
                // Both removals are attempted so the pair state matches the model
                let removed_a = solver.remove_element(pair.element_a);
                let removed_b = solver.remove_element(pair.element_b);
                if removed_a.is_ok() || removed_b.is_ok() {
                    pair.alive = false;
                    pair.failure_step = Some(pair.failure_step.map_or(step, |s| s.min(step)));
                }
                removed_a.and(removed_b).map_err(DriverError::Solver)?;
                info!(
                    "Struts {} and {} removed at step {} (drift {:.5} > {:.5})",
                    pair.element_a, pair.element_b, step, drift, pair.drift_capacity
                );
            } else {
                debug!(
                    "Struts {}/{} drift {:.5} of {:.5}",
                    pair.element_a, pair.element_b, drift, pair.drift_capacity
                );
            }
        }
        self.forces(&*solver)
    }

    /// Current force readings; removed pairs read zero
    pub fn forces<S: Solver + ?Sized>(&self, solver: &S) -> DriverResult<Vec<PairForces>> {
        self.pairs
            .iter()
            .map(|pair| {
                let (force_a, force_b) = if pair.alive {
                    (
                        solver
                            .element_force(pair.element_a)
                            .map_err(DriverError::from_query)?,
                        solver
                            .element_force(pair.element_b)
                            .map_err(DriverError::from_query)?,
                    )
                } else {
                    (vec![0.0; self.force_width], vec![0.0; self.force_width])
                };
                Ok(PairForces {
                    element_a: pair.element_a,
                    element_b: pair.element_b,
                    force_a,
                    force_b,
                })
            })
            .collect()
    }

    /// Failure steps of removed pairs, sorted and without duplicates
    pub fn failure_steps(&self) -> Vec<usize> {
        let mut steps: Vec<usize> = self.pairs.iter().filter_map(|p| p.failure_step).collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }
}
