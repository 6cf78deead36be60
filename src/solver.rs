//! Step solver facade
//!
//! The finite element model lives behind this trait. Procedures only ever
//! talk to the model through a `&mut S where S: Solver` handle that the caller
//! passes in explicitly, so several independent analyses can be built and torn
//! down side by side.

use serde::{Deserialize, Serialize};

use crate::analysis::config::{
    Algorithm, AnalysisConfiguration, AnalysisKind, ConstraintHandler, ConvergenceTest,
    Integrator, Numberer, SystemSolver,
};
use crate::damping::RayleighDamping;
use crate::error::SolverResult;
use crate::ground_motion::GroundMotion;

/// Node identifier inside the solver model
pub type NodeTag = usize;
/// Element identifier inside the solver model
pub type ElementTag = usize;

/// Outcome of one `analyze` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Convergence {
    /// Every requested step met the convergence test
    Converged,
    /// The convergence test was not met within its iteration limit
    NotConverged,
}

impl Convergence {
    pub fn is_converged(self) -> bool {
        matches!(self, Convergence::Converged)
    }
}

/// Element response channels beyond the plain global force vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseQuery {
    /// Element end forces in global coordinates
    GlobalForce,
    /// Plastic deformations (hinge rotations for beam-columns)
    PlasticDeformation,
    /// Stress and strain at a fiber of a section
    SectionFiber {
        /// Integration point / section number (1-based)
        section: usize,
        /// Local y coordinate of the fiber
        y: f64,
        /// Local z coordinate of the fiber
        z: f64,
        /// Material tag of the fiber
        material: usize,
    },
    /// Any other solver-specific channel, passed through verbatim
    Named(Vec<String>),
}

/// Narrow call interface onto an external finite element solver
///
/// DOF and axis numbers are 1-based, as in the solver's own command language.
pub trait Solver {
    // ========================
    // Configuration
    // ========================

    /// Discard the current analysis objects, keeping the model
    fn reset_analysis(&mut self);

    fn set_constraints(&mut self, handler: ConstraintHandler) -> SolverResult<()>;

    fn set_numberer(&mut self, numberer: Numberer) -> SolverResult<()>;

    fn set_system(&mut self, system: SystemSolver) -> SolverResult<()>;

    fn set_test(&mut self, test: &ConvergenceTest) -> SolverResult<()>;

    fn set_algorithm(&mut self, algorithm: &Algorithm) -> SolverResult<()>;

    fn set_integrator(&mut self, integrator: &Integrator) -> SolverResult<()>;

    fn set_analysis(&mut self, kind: AnalysisKind) -> SolverResult<()>;

    /// Apply a full analysis configuration
    fn apply_configuration(&mut self, config: &AnalysisConfiguration) -> SolverResult<()> {
        self.set_constraints(config.constraints)?;
        self.set_numberer(config.numberer)?;
        self.set_system(config.system)?;
        self.set_test(&config.test)?;
        self.set_algorithm(&config.algorithm)?;
        self.set_integrator(&config.integrator)?;
        self.set_analysis(config.analysis)
    }

    // ========================
    // Stepping
    // ========================

    /// Advance `steps` increments; transient analyses also take the time step
    fn analyze(&mut self, steps: usize, dt: Option<f64>) -> SolverResult<Convergence>;

    /// Load factor for static analyses, time for transient ones
    fn current_time(&self) -> f64;

    // ========================
    // State queries
    // ========================

    fn node_displacement(&self, node: NodeTag, dof: usize) -> SolverResult<f64>;

    fn node_velocity(&self, node: NodeTag, dof: usize) -> SolverResult<f64>;

    fn node_acceleration(&self, node: NodeTag, dof: usize) -> SolverResult<f64>;

    fn node_coordinate(&self, node: NodeTag, axis: usize) -> SolverResult<f64>;

    /// End nodes of a two-node element
    fn element_nodes(&self, element: ElementTag) -> SolverResult<(NodeTag, NodeTag)>;

    /// Element resisting force vector in global coordinates
    fn element_force(&self, element: ElementTag) -> SolverResult<Vec<f64>>;

    fn element_response(&self, element: ElementTag, query: &ResponseQuery)
        -> SolverResult<Vec<f64>>;

    /// The lowest `modes` eigenvalues (ω²) in ascending order
    fn eigenvalues(&mut self, modes: usize) -> SolverResult<Vec<f64>>;

    // ========================
    // Model mutation
    // ========================

    fn remove_element(&mut self, element: ElementTag) -> SolverResult<()>;

    /// Define the record time series and a uniform excitation along `dof`
    fn define_ground_motion(&mut self, motion: &GroundMotion, dof: usize) -> SolverResult<()>;

    fn set_rayleigh_damping(&mut self, damping: &RayleighDamping) -> SolverResult<()>;
}
