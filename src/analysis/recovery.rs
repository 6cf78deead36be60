//! Convergence recovery
//!
//! One step is first attempted with the procedure's default test and
//! algorithm. If that fails, the entries of a [`FallbackLadder`] are tried in
//! order, each with an enlarged iteration budget. The first entry that
//! converges wins and the defaults are put back before returning.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::config::{
    Algorithm, AlgorithmKind, AnalysisConfiguration, ConvergenceTest, TestKind,
};
use crate::error::SolverResult;
use crate::solver::{NodeTag, Solver};

/// Which convergence test a fallback entry uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestSelection {
    /// The procedure's own test kind and tolerance
    Default,
    /// Another test kind with the procedure's tolerance
    Kind(TestKind),
}

/// One row of the fallback table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    /// Convergence test to switch to
    pub test: TestSelection,
    /// Algorithm to switch to
    pub algorithm: Algorithm,
}

impl Fallback {
    pub fn new(test: TestSelection, algorithm: Algorithm) -> Self {
        Self { test, algorithm }
    }

    /// Concrete test for this entry given the procedure default
    pub fn convergence_test(&self, default: &ConvergenceTest, scale: usize) -> ConvergenceTest {
        let kind = match self.test {
            TestSelection::Default => default.kind,
            TestSelection::Kind(kind) => kind,
        };
        ConvergenceTest {
            kind,
            ..default.scaled(scale)
        }
    }
}

/// Ordered table of alternate iteration strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackLadder {
    /// Entries in the order they are tried
    pub entries: Vec<Fallback>,
    /// Multiplier applied to the default iteration budget
    pub iteration_scale: usize,
}

impl Default for FallbackLadder {
    fn default() -> Self {
        Self::standard()
    }
}

impl FallbackLadder {
    /// Algorithms of the standard ladder, initial-stiffness variants first
    pub fn algorithms() -> [Algorithm; 7] {
        [
            Algorithm::initial(AlgorithmKind::KrylovNewton),
            Algorithm::initial(AlgorithmKind::SecantNewton),
            Algorithm::tangent(AlgorithmKind::RaphsonNewton),
            Algorithm::tangent(AlgorithmKind::PeriodicNewton),
            Algorithm::tangent(AlgorithmKind::Bfgs),
            Algorithm::tangent(AlgorithmKind::Broyden),
            Algorithm::tangent(AlgorithmKind::NewtonLineSearch),
        ]
    }

    /// Seven algorithms with the default test and 50x the iterations
    pub fn standard() -> Self {
        Self {
            entries: Self::algorithms()
                .into_iter()
                .map(|algorithm| Fallback::new(TestSelection::Default, algorithm))
                .collect(),
            iteration_scale: 50,
        }
    }

    /// Every alternate test kind crossed with every algorithm
    pub fn exhaustive() -> Self {
        let mut entries = Vec::with_capacity(TestKind::ALTERNATES.len() * 7);
        for kind in TestKind::ALTERNATES {
            for algorithm in Self::algorithms() {
                entries.push(Fallback::new(TestSelection::Kind(kind), algorithm));
            }
        }
        Self {
            entries,
            iteration_scale: 100,
        }
    }

    /// No fallbacks: the first failure is final
    pub fn none() -> Self {
        Self {
            entries: Vec::new(),
            iteration_scale: 1,
        }
    }

    /// Set the iteration budget multiplier
    pub fn with_iteration_scale(mut self, scale: usize) -> Self {
        self.iteration_scale = scale.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Quantity reported as the step's control value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlChannel {
    /// Solver pseudo-time (load factor or time)
    PseudoTime,
    /// Displacement of a node DOF
    NodeDof { node: NodeTag, dof: usize },
}

impl ControlChannel {
    pub fn read<S: Solver + ?Sized>(&self, solver: &S) -> SolverResult<f64> {
        match *self {
            ControlChannel::PseudoTime => Ok(solver.current_time()),
            ControlChannel::NodeDof { node, dof } => solver.node_displacement(node, dof),
        }
    }
}

/// Arguments for a single step attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepArgs {
    /// Zero-based step index within the procedure
    pub index: usize,
    /// Time step for transient analyses
    pub dt: Option<f64>,
    /// What to report as the control value
    pub control: ControlChannel,
}

/// Status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Converged,
    Failed,
}

/// Result of one step attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Converged or failed after the whole ladder
    pub status: StepStatus,
    /// Zero-based step index
    pub step_index: usize,
    /// Control displacement or pseudo-time after the last attempt
    pub control_value: f64,
    /// Number of `analyze` calls made, including the default attempt
    pub attempts: usize,
    /// Ladder position that recovered the step, if any
    pub recovered_by: Option<usize>,
}

impl StepResult {
    pub fn is_converged(&self) -> bool {
        self.status == StepStatus::Converged
    }
}

/// Runs single steps with fallback on non-convergence
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    ladder: FallbackLadder,
}

impl RecoveryEngine {
    pub fn new(ladder: FallbackLadder) -> Self {
        Self { ladder }
    }

    pub fn ladder(&self) -> &FallbackLadder {
        &self.ladder
    }

    /// Attempt one step, walking the ladder if the defaults fail.
    ///
    /// Solver errors raised during any attempt count as non-convergence.
    /// On return the solver's test and algorithm equal `defaults`.
    pub fn attempt_step<S: Solver + ?Sized>(
        &self,
        solver: &mut S,
        defaults: &AnalysisConfiguration,
        args: StepArgs,
    ) -> StepResult {
        if let Err(e) = Self::restore(solver, defaults) {
            warn!("Could not apply default configuration before step {}: {}", args.index, e);
        }

        let mut attempts = 1;
        if Self::advance(solver, args) {
            return Self::finish(solver, args, StepStatus::Converged, attempts, None);
        }

        warn!(
            "Default configuration did not converge at step {} (control value {})",
            args.index,
            Self::control_value(solver, args)
        );

        for (position, fallback) in self.ladder.entries.iter().enumerate() {
            let test = fallback.convergence_test(&defaults.test, self.ladder.iteration_scale);
            if let Err(e) = solver
                .set_test(&test)
                .and_then(|_| solver.set_algorithm(&fallback.algorithm))
            {
                warn!("Fallback {} could not be configured: {}", position, e);
                continue;
            }

            attempts += 1;
            debug!(
                "Step {}: trying {:?} with {:?} ({} iterations)",
                args.index, fallback.algorithm, test.kind, test.max_iterations
            );
            if Self::advance(solver, args) {
                if let Err(e) = Self::restore(solver, defaults) {
                    error!("Could not restore default configuration: {}", e);
                }
                info!(
                    "Step {} recovered with {:?} / {:?}",
                    args.index, fallback.algorithm.kind, test.kind
                );
                return Self::finish(
                    solver,
                    args,
                    StepStatus::Converged,
                    attempts,
                    Some(position),
                );
            }
        }

        if let Err(e) = Self::restore(solver, defaults) {
            error!("Could not restore default configuration: {}", e);
        }
        let result = Self::finish(solver, args, StepStatus::Failed, attempts, None);
        error!(
            "Step {} failed after {} attempts, control value reached: {}",
            args.index, attempts, result.control_value
        );
        result
    }

    fn advance<S: Solver + ?Sized>(solver: &mut S, args: StepArgs) -> bool {
        match solver.analyze(1, args.dt) {
            Ok(status) => status.is_converged(),
            Err(e) => {
                warn!("Solver raised during step {}: {}", args.index, e);
                false
            }
        }
    }

    fn restore<S: Solver + ?Sized>(
        solver: &mut S,
        defaults: &AnalysisConfiguration,
    ) -> SolverResult<()> {
        solver.set_test(&defaults.test)?;
        solver.set_algorithm(&defaults.algorithm)
    }

    fn control_value<S: Solver + ?Sized>(solver: &S, args: StepArgs) -> f64 {
        args.control.read(solver).unwrap_or(f64::NAN)
    }

    fn finish<S: Solver + ?Sized>(
        solver: &S,
        args: StepArgs,
        status: StepStatus,
        attempts: usize,
        recovered_by: Option<usize>,
    ) -> StepResult {
        StepResult {
            status,
            step_index: args.index,
            control_value: Self::control_value(solver, args),
            attempts,
            recovered_by,
        }
    }
}
