//! Analysis procedures and their configuration

pub mod batch;
pub mod config;
pub mod procedure;
pub mod recovery;

pub use batch::{ida_procedures, run_batch};
pub use config::{
    Algorithm, AlgorithmKind, AnalysisConfiguration, AnalysisKind, ConstraintHandler,
    ConvergenceTest, Integrator, Numberer, SystemSolver, TestKind,
};
pub use procedure::{ControlPlan, DriverState, Procedure};
pub use recovery::{
    ControlChannel, Fallback, FallbackLadder, RecoveryEngine, StepArgs, StepResult, StepStatus,
    TestSelection,
};
