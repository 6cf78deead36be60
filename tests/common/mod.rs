//! Scripted stub solver shared by the integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use seismic_driver::analysis::config::{
    Algorithm, AnalysisKind, ConstraintHandler, ConvergenceTest, Integrator, Numberer,
    SystemSolver,
};
use seismic_driver::damping::RayleighDamping;
use seismic_driver::error::{SolverError, SolverResult};
use seismic_driver::ground_motion::GroundMotion;
use seismic_driver::solver::{Convergence, ElementTag, NodeTag, ResponseQuery, Solver};

/// Stiffness used to fake element forces
pub const ELEMENT_STIFFNESS: f64 = 100.0;

/// One `analyze` call as seen by the solver
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeCall {
    pub step: usize,
    pub test: Option<ConvergenceTest>,
    pub algorithm: Option<Algorithm>,
    pub dt: Option<f64>,
}

/// Solver whose convergence behaviour is scripted per step.
///
/// Nodes move rigidly with the control node in proportion to their height, so
/// every story has the same drift.
#[derive(Debug, Default)]
pub struct ScriptedSolver {
    /// Steps (converged-step count at the time) whose default attempt fails
    pub fail_default_at: BTreeSet<usize>,
    /// Steps that fail every attempt
    pub never_converge_at: BTreeSet<usize>,
    /// Attempt number (0 = default) that converges on a scripted failure
    pub converge_on_attempt: usize,
    /// Attempt numbers that raise instead of returning a status
    pub raise_on_attempt: BTreeSet<usize>,
    /// Element whose force query fails after this many steps
    pub force_error_after: Option<(ElementTag, usize)>,
    /// Elements the solver refuses to remove
    pub refuse_removal: BTreeSet<ElementTag>,
    /// Algorithms the solver refuses to configure
    pub refuse_algorithm: Vec<Algorithm>,

    pub calls: Vec<AnalyzeCall>,
    pub resets: usize,
    pub test: Option<ConvergenceTest>,
    pub algorithm: Option<Algorithm>,
    pub integrator: Option<Integrator>,
    pub kind: Option<AnalysisKind>,
    pub ground: Option<(GroundMotion, usize)>,
    pub damping: Option<RayleighDamping>,
    pub eigenvalues: Vec<f64>,
    pub removed: Vec<ElementTag>,

    heights: BTreeMap<NodeTag, f64>,
    elements: BTreeMap<ElementTag, (NodeTag, NodeTag)>,
    control_height: f64,
    roof: f64,
    time: f64,
    converged_steps: usize,
    attempt: usize,
}

impl ScriptedSolver {
    /// Stack of nodes `0..=stories` at `story_height` spacing, control at the top
    pub fn stack(stories: usize, story_height: f64) -> Self {
        let heights = (0..=stories)
            .map(|i| (i, i as f64 * story_height))
            .collect();
        Self {
            heights,
            control_height: stories as f64 * story_height,
            converge_on_attempt: 1,
            eigenvalues: vec![100.0, 900.0, 2500.0, 4900.0],
            ..Default::default()
        }
    }

    pub fn with_element(mut self, tag: ElementTag, node_i: NodeTag, node_j: NodeTag) -> Self {
        self.elements.insert(tag, (node_i, node_j));
        self
    }

    pub fn converged_steps(&self) -> usize {
        self.converged_steps
    }

    fn displacement(&self, node: NodeTag) -> SolverResult<f64> {
        let y = self
            .heights
            .get(&node)
            .ok_or(SolverError::NodeNotFound(node))?;
        Ok(self.roof * y / self.control_height)
    }

    fn element(&self, tag: ElementTag) -> SolverResult<(NodeTag, NodeTag)> {
        if self.removed.contains(&tag) {
            return Err(SolverError::ElementRemoved(tag));
        }
        self.elements
            .get(&tag)
            .copied()
            .ok_or(SolverError::ElementNotFound(tag))
    }

    fn advance(&mut self, dt: Option<f64>) {
        match self.integrator {
            Some(Integrator::LoadControl { increment }) => self.time += increment,
            Some(Integrator::DisplacementControl { increment, .. }) => {
                self.roof += increment;
                self.time += 1.0;
            }
            Some(Integrator::Newmark { .. }) => self.time += dt.unwrap_or(0.0),
            None => {}
        }
    }
}

impl Solver for ScriptedSolver {
    fn reset_analysis(&mut self) {
        self.resets += 1;
        self.test = None;
        self.algorithm = None;
        self.integrator = None;
        self.kind = None;
    }

    fn set_constraints(&mut self, _handler: ConstraintHandler) -> SolverResult<()> {
        Ok(())
    }

    fn set_numberer(&mut self, _numberer: Numberer) -> SolverResult<()> {
        Ok(())
    }

    fn set_system(&mut self, _system: SystemSolver) -> SolverResult<()> {
        Ok(())
    }

    fn set_test(&mut self, test: &ConvergenceTest) -> SolverResult<()> {
        self.test = Some(*test);
        Ok(())
    }

    fn set_algorithm(&mut self, algorithm: &Algorithm) -> SolverResult<()> {
        if self.refuse_algorithm.contains(algorithm) {
            return Err(SolverError::Unsupported(format!("{:?}", algorithm)));
        }
        self.algorithm = Some(*algorithm);
        Ok(())
    }

    fn set_integrator(&mut self, integrator: &Integrator) -> SolverResult<()> {
        self.integrator = Some(*integrator);
        Ok(())
    }

    fn set_analysis(&mut self, kind: AnalysisKind) -> SolverResult<()> {
        self.kind = Some(kind);
        Ok(())
    }

    fn analyze(&mut self, steps: usize, dt: Option<f64>) -> SolverResult<Convergence> {
        assert_eq!(steps, 1, "procedures advance one step at a time");
        let step = self.converged_steps;
        let attempt = self.attempt;
        self.calls.push(AnalyzeCall {
            step,
            test: self.test,
            algorithm: self.algorithm,
            dt,
        });
        self.attempt += 1;

        if self.raise_on_attempt.contains(&attempt) && self.fails(step) {
            return Err(SolverError::AnalysisFailed(format!("scripted raise at attempt {}", attempt)));
        }
        let converged = if self.never_converge_at.contains(&step) {
            false
        } else if self.fail_default_at.contains(&step) {
            attempt >= self.converge_on_attempt
        } else {
            true
        };
        if converged {
            self.advance(dt);
            self.converged_steps += 1;
            self.attempt = 0;
            Ok(Convergence::Converged)
        } else {
            Ok(Convergence::NotConverged)
        }
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn node_displacement(&self, node: NodeTag, dof: usize) -> SolverResult<f64> {
        if dof == 1 {
            self.displacement(node)
        } else {
            Ok(0.0)
        }
    }

    fn node_velocity(&self, node: NodeTag, _dof: usize) -> SolverResult<f64> {
        self.displacement(node).map(|d| 2.0 * d)
    }

    fn node_acceleration(&self, node: NodeTag, _dof: usize) -> SolverResult<f64> {
        self.displacement(node).map(|d| 3.0 * d)
    }

    fn node_coordinate(&self, node: NodeTag, axis: usize) -> SolverResult<f64> {
        let y = *self
            .heights
            .get(&node)
            .ok_or(SolverError::NodeNotFound(node))?;
        Ok(if axis == 2 { y } else { 0.0 })
    }

    fn element_nodes(&self, element: ElementTag) -> SolverResult<(NodeTag, NodeTag)> {
        self.element(element)
    }

    fn element_force(&self, element: ElementTag) -> SolverResult<Vec<f64>> {
        let (i, j) = self.element(element)?;
        if let Some((tag, after)) = self.force_error_after {
            if tag == element && self.converged_steps > after {
                return Err(SolverError::AnalysisFailed("scripted query failure".into()));
            }
        }
        let f = ELEMENT_STIFFNESS * (self.displacement(j)? - self.displacement(i)?);
        Ok(vec![-f, 0.0, 0.0, f, 0.0, 0.0])
    }

    fn element_response(&self, element: ElementTag, query: &ResponseQuery) -> SolverResult<Vec<f64>> {
        match query {
            ResponseQuery::GlobalForce => self.element_force(element),
            ResponseQuery::PlasticDeformation => {
                self.element(element)?;
                Ok(vec![0.0, 0.0, 0.0])
            }
            _ => Err(SolverError::Unsupported(format!("{:?}", query))),
        }
    }

    fn eigenvalues(&mut self, modes: usize) -> SolverResult<Vec<f64>> {
        if modes > self.eigenvalues.len() {
            return Err(SolverError::InvalidInput(format!("{} modes", modes)));
        }
        Ok(self.eigenvalues[..modes].to_vec())
    }

    fn remove_element(&mut self, element: ElementTag) -> SolverResult<()> {
        self.element(element)?;
        if self.refuse_removal.contains(&element) {
            return Err(SolverError::AnalysisFailed(format!("cannot remove {}", element)));
        }
        self.removed.push(element);
        Ok(())
    }

    fn define_ground_motion(&mut self, motion: &GroundMotion, dof: usize) -> SolverResult<()> {
        self.ground = Some((motion.clone(), dof));
        self.time = 0.0;
        Ok(())
    }

    fn set_rayleigh_damping(&mut self, damping: &RayleighDamping) -> SolverResult<()> {
        self.damping = Some(*damping);
        Ok(())
    }
}

impl ScriptedSolver {
    fn fails(&self, step: usize) -> bool {
        self.fail_default_at.contains(&step) || self.never_converge_at.contains(&step)
    }
}
