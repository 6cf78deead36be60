//! Analysis configuration: the objects a solver needs before it can step

use serde::{Deserialize, Serialize};

use crate::solver::NodeTag;

/// How single- and multi-point constraints are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintHandler {
    Plain,
    Transformation,
}

/// DOF numbering scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Numberer {
    Plain,
    /// Reverse Cuthill-McKee
    Rcm,
}

/// Linear system of equations storage/solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemSolver {
    BandGeneral,
    FullGeneral,
    SparseGeneral,
}

/// Quantity checked by a convergence test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestKind {
    /// Norm of the unbalanced force vector
    NormUnbalance,
    /// Norm of the displacement increment
    NormDispIncr,
    /// Half the product of displacement increment and unbalance
    EnergyIncr,
    RelativeNormUnbalance,
    RelativeNormDispIncr,
    RelativeEnergyIncr,
}

impl TestKind {
    /// The five alternates used by the exhaustive fallback ladder
    pub const ALTERNATES: [TestKind; 5] = [
        TestKind::NormDispIncr,
        TestKind::RelativeEnergyIncr,
        TestKind::RelativeNormUnbalance,
        TestKind::RelativeNormDispIncr,
        TestKind::NormUnbalance,
    ];

    /// Relative tests compare against the first iteration's value
    pub fn is_relative(self) -> bool {
        matches!(
            self,
            TestKind::RelativeNormUnbalance
                | TestKind::RelativeNormDispIncr
                | TestKind::RelativeEnergyIncr
        )
    }
}

/// Convergence test with its tolerance and iteration budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTest {
    /// Quantity to check
    pub kind: TestKind,
    /// Convergence tolerance
    pub tolerance: f64,
    /// Maximum iterations before the step is declared non-convergent
    pub max_iterations: usize,
}

impl ConvergenceTest {
    pub fn new(kind: TestKind, tolerance: f64, max_iterations: usize) -> Self {
        Self {
            kind,
            tolerance,
            max_iterations,
        }
    }

    /// Same test with a multiplied iteration budget
    pub fn scaled(&self, factor: usize) -> Self {
        Self {
            max_iterations: self.max_iterations.saturating_mul(factor.max(1)),
            ..*self
        }
    }
}

/// Equation solving algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    Newton,
    ModifiedNewton,
    KrylovNewton,
    SecantNewton,
    RaphsonNewton,
    PeriodicNewton,
    Bfgs,
    Broyden,
    NewtonLineSearch,
}

/// Iteration algorithm, optionally iterating on the initial stiffness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithm {
    /// Algorithm family
    pub kind: AlgorithmKind,
    /// Iterate with the initial rather than the current tangent stiffness
    pub initial: bool,
}

impl Algorithm {
    /// Algorithm iterating on the current tangent
    pub fn tangent(kind: AlgorithmKind) -> Self {
        Self {
            kind,
            initial: false,
        }
    }

    /// Algorithm iterating on the initial stiffness
    pub fn initial(kind: AlgorithmKind) -> Self {
        Self {
            kind,
            initial: true,
        }
    }

    pub fn newton() -> Self {
        Self::tangent(AlgorithmKind::Newton)
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::newton()
    }
}

/// Time/load stepping scheme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Integrator {
    /// Increment the load factor by a fixed amount per step
    LoadControl { increment: f64 },
    /// Increment the displacement of one node DOF per step
    DisplacementControl {
        node: NodeTag,
        dof: usize,
        increment: f64,
    },
    /// Newmark average-acceleration family
    Newmark { gamma: f64, beta: f64 },
}

impl Integrator {
    /// Constant average acceleration
    pub fn average_acceleration() -> Self {
        Integrator::Newmark {
            gamma: 0.5,
            beta: 0.25,
        }
    }
}

/// Static or transient analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisKind {
    Static,
    Transient,
}

/// Complete set of analysis objects handed to the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfiguration {
    /// Constraint handler
    pub constraints: ConstraintHandler,
    /// DOF numberer
    pub numberer: Numberer,
    /// System of equations
    pub system: SystemSolver,
    /// Convergence test
    pub test: ConvergenceTest,
    /// Iteration algorithm
    pub algorithm: Algorithm,
    /// Integrator
    pub integrator: Integrator,
    /// Analysis type
    pub analysis: AnalysisKind,
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self::gravity(0.1)
    }
}

impl AnalysisConfiguration {
    /// Load-controlled static analysis (gravity loading)
    pub fn gravity(increment: f64) -> Self {
        Self {
            constraints: ConstraintHandler::Plain,
            numberer: Numberer::Rcm,
            system: SystemSolver::BandGeneral,
            test: ConvergenceTest::new(TestKind::NormDispIncr, 1e-12, 10),
            algorithm: Algorithm::newton(),
            integrator: Integrator::LoadControl { increment },
            analysis: AnalysisKind::Static,
        }
    }

    /// Displacement-controlled monotonic pushover
    pub fn pushover(node: NodeTag, dof: usize, increment: f64) -> Self {
        Self {
            test: ConvergenceTest::new(TestKind::EnergyIncr, 1e-8, 10),
            integrator: Integrator::DisplacementControl {
                node,
                dof,
                increment,
            },
            ..Self::gravity(increment)
        }
    }

    /// Displacement-controlled cyclic pushover
    pub fn cyclic(node: NodeTag, dof: usize, increment: f64) -> Self {
        Self {
            test: ConvergenceTest::new(TestKind::NormUnbalance, 1e-4, 10),
            ..Self::pushover(node, dof, increment)
        }
    }

    /// Newmark transient analysis
    pub fn transient() -> Self {
        Self {
            test: ConvergenceTest::new(TestKind::NormUnbalance, 1e-4, 10),
            integrator: Integrator::average_acceleration(),
            analysis: AnalysisKind::Transient,
            ..Self::gravity(0.0)
        }
    }

    /// Set convergence tolerance
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.test.tolerance = tol;
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.test.max_iterations = max_iter;
        self
    }

    /// Set the convergence test kind
    pub fn with_test(mut self, kind: TestKind) -> Self {
        self.test.kind = kind;
        self
    }

    /// Replace the integrator, keeping everything else
    pub fn with_integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }
}
