//! Error types for the analysis driver

use thiserror::Error;

use crate::results::AnalysisOutcome;
use crate::solver::{ElementTag, NodeTag};

/// Errors reported by a step solver implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Node {0} not found in model")]
    NodeNotFound(NodeTag),

    #[error("Element {0} not found in model")]
    ElementNotFound(ElementTag),

    #[error("Element {0} has been removed from the model")]
    ElementRemoved(ElementTag),

    #[error("Duplicate tag {0} already exists")]
    DuplicateTag(usize),

    #[error("Singular stiffness matrix - model may be unstable")]
    SingularMatrix,

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),
}

/// Errors reported by the analysis procedures
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Invalid tracking configuration: {0}")]
    InvalidTracking(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Procedure aborted after {} of {} steps", .0.steps_completed, .0.total_steps)]
    ProcedureAbort(Box<AnalysisOutcome>),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DriverError {
    /// Classify a solver failure seen while querying tracked entities.
    ///
    /// Reading a removed element is a logic error in the caller, not a
    /// solver fault, so it is reported as a precondition violation.
    pub fn from_query(err: SolverError) -> Self {
        match err {
            SolverError::ElementRemoved(tag) => DriverError::PreconditionViolation(format!(
                "element {} was queried after removal",
                tag
            )),
            other => DriverError::Solver(other),
        }
    }
}

/// Result type for solver calls
pub type SolverResult<T> = Result<T, SolverError>;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
