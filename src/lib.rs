//! Seismic Driver - nonlinear analysis procedures over a pluggable step solver
//!
//! This library drives incremental structural analyses against any model that
//! implements the [`solver::Solver`] facade:
//! - Load-controlled static analysis (gravity)
//! - Monotonic and cyclic displacement-controlled pushover
//! - Transient seismic response with Rayleigh damping
//! - Incremental dynamic analysis batches
//!
//! Every step goes through a convergence recovery engine that retries failed
//! steps with an ordered ladder of alternate tests and algorithms. Response
//! channels are recorded into pre-sized series, and infill struts can be
//! removed once their drift capacity is exceeded.
//!
//! ## Example
//! ```rust
//! use seismic_driver::prelude::*;
//!
//! // Three-story shear building with bilinear story springs
//! let mut model = ShearBuilding::uniform(3, 3.0, 10.0, Bilinear::new(5000.0, 60.0, 0.02)).unwrap();
//! model.set_triangular_pattern();
//!
//! // Push the roof to 90 mm in 1 mm increments, recording story drifts
//! let pushover = Procedure::pushover(3, 1, 0.09, 0.001)
//!     .with_recorder(RecorderSpec::new().with_story_nodes(vec![0, 1, 2, 3]).with_element_forces("base", vec![1]));
//!
//! let outcome = pushover.run(&mut model).unwrap();
//! assert!(outcome.is_completed());
//! assert_eq!(outcome.series.len(), 91);
//!
//! let curve = outcome.capacity_curve("base", 0).unwrap();
//! println!("Peak base shear: {:?}", curve.peak());
//! ```

pub mod analysis;
pub mod backend;
pub mod damping;
pub mod error;
pub mod ground_motion;
pub mod math;
pub mod recorder;
pub mod removal;
pub mod results;
pub mod solver;

// Re-export common types
pub mod prelude {
    pub use crate::analysis::{
        ida_procedures, run_batch, Algorithm, AlgorithmKind, AnalysisConfiguration,
        ControlPlan, ConvergenceTest, FallbackLadder, Integrator, Procedure, RecoveryEngine,
        StepArgs, StepResult, StepStatus, TestKind,
    };
    pub use crate::backend::{Bilinear, BuildingSpec, Element, Floor, ShearBuilding};
    pub use crate::damping::{DampingSpec, RayleighDamping};
    pub use crate::error::{DriverError, DriverResult, SolverError, SolverResult};
    pub use crate::ground_motion::GroundMotion;
    pub use crate::recorder::{RecorderSpec, ResponseSeries};
    pub use crate::removal::StrutPair;
    pub use crate::results::{AnalysisOutcome, CapacityCurve, ProcedureStatus};
    pub use crate::solver::{Convergence, ElementTag, NodeTag, ResponseQuery, Solver};
}
