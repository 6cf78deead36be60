//! Step driver behaviour against a scripted solver

mod common;

use approx::assert_relative_eq;
use common::ScriptedSolver;
use seismic_driver::analysis::config::Integrator;
use seismic_driver::analysis::{ida_procedures, run_batch, FallbackLadder, Procedure};
use seismic_driver::damping::DampingSpec;
use seismic_driver::error::DriverError;
use seismic_driver::ground_motion::GroundMotion;
use seismic_driver::recorder::RecorderSpec;
use seismic_driver::removal::StrutPair;
use seismic_driver::results::{AbortReason, ProcedureStatus};

#[test]
fn test_monotonic_pushover_step_count() {
    let mut solver = ScriptedSolver::stack(2, 3.0);
    let outcome = Procedure::pushover(2, 1, 0.055, 0.01)
        .run(&mut solver)
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.total_steps, 5);
    assert_eq!(outcome.steps_completed, 5);
    assert_eq!(outcome.series.len(), 6);
    assert_eq!(outcome.series.control[0], 0.0);
    assert_relative_eq!(outcome.series.control[5], 0.05, epsilon = 1e-12);
    assert_eq!(solver.resets, 1);
}

#[test]
fn test_negative_pushover_moves_backwards() {
    let mut solver = ScriptedSolver::stack(1, 3.0);
    let outcome = Procedure::pushover(1, 1, -0.03, 0.01)
        .run(&mut solver)
        .unwrap();

    assert_eq!(outcome.steps_completed, 3);
    assert_relative_eq!(outcome.series.control[3], -0.03, epsilon = 1e-12);
}

#[test]
fn test_abort_truncates_partial_series() {
    let mut solver = ScriptedSolver::stack(2, 3.0);
    solver.never_converge_at.insert(3);

    let outcome = Procedure::pushover(2, 1, 0.1, 0.01)
        .with_recorder(RecorderSpec::new().with_story_nodes(vec![0, 1, 2]))
        .run(&mut solver)
        .unwrap();

    assert!(outcome.is_aborted());
    assert_eq!(outcome.steps_completed, 3);
    assert_eq!(outcome.total_steps, 10);
    assert_eq!(outcome.series.len(), 4);
    assert_eq!(outcome.series.drift.as_ref().unwrap().len(), 4);
    match &outcome.status {
        ProcedureStatus::Aborted {
            step,
            control_value,
            reason,
        } => {
            assert_eq!(*step, 3);
            assert_relative_eq!(*control_value, 0.03, epsilon = 1e-12);
            assert_eq!(*reason, AbortReason::NonConvergence);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    // Default attempt plus every fallback for the failing step
    let failing: Vec<_> = solver.calls.iter().filter(|c| c.step == 3).collect();
    assert_eq!(failing.len(), 1 + FallbackLadder::standard().len());

    match outcome.into_result() {
        Err(DriverError::ProcedureAbort(partial)) => assert_eq!(partial.steps_completed, 3),
        _ => panic!("expected ProcedureAbort"),
    }
}

#[test]
fn test_recovered_steps_keep_defaults() {
    let mut solver = ScriptedSolver::stack(2, 3.0);
    solver.fail_default_at.extend([1, 4]);
    solver.converge_on_attempt = 2;

    let procedure = Procedure::pushover(2, 1, 0.06, 0.01);
    let outcome = procedure.run(&mut solver).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.recovered_steps, 2);
    let defaults = procedure.defaults();
    assert_eq!(solver.test, Some(defaults.test));
    assert_eq!(solver.algorithm, Some(defaults.algorithm));
    // Every default attempt saw the default configuration
    for call in solver.calls.iter().filter(|c| c.algorithm == Some(defaults.algorithm)) {
        assert_eq!(call.test, Some(defaults.test));
    }
}

#[test]
fn test_cyclic_segment_step_counts() {
    let mut solver = ScriptedSolver::stack(1, 3.0);
    let procedure = Procedure::cyclic(1, 1, vec![0.05, -0.03, 0.02], 0.01);

    let outcome = procedure.run(&mut solver).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.steps_completed, 5 + 8 + 5);
    assert_eq!(outcome.series.len(), 19);
    let control = &outcome.series.control;
    assert_relative_eq!(control[5], 0.05, epsilon = 1e-9);
    assert_relative_eq!(control[13], -0.03, epsilon = 1e-9);
    assert_relative_eq!(control[18], 0.02, epsilon = 1e-9);
    assert!(matches!(
        solver.integrator,
        Some(Integrator::DisplacementControl { increment, .. }) if increment > 0.0
    ));
}

#[test]
fn test_cyclic_keeps_unbalance_test() {
    let procedure = Procedure::cyclic(1, 1, vec![0.01], 0.001);
    let pushover = Procedure::pushover(1, 1, 0.01, 0.001);
    assert_ne!(procedure.config.test.kind, pushover.config.test.kind);
}

#[test]
fn test_gravity_load_control() {
    let mut solver = ScriptedSolver::stack(1, 3.0);
    let outcome = Procedure::gravity(0.1, 10).run(&mut solver).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.series.len(), 11);
    assert_relative_eq!(outcome.series.control[10], 1.0, epsilon = 1e-12);
}

#[test]
fn test_transient_tail_and_damping() {
    let mut solver = ScriptedSolver::stack(2, 3.0);
    let record = GroundMotion::new(0.01, vec![1.0; 300]).unwrap().with_factor(2.0);
    let procedure = Procedure::transient(record, 0.01)
        .with_recorder(
            RecorderSpec::new()
                .with_story_nodes(vec![0, 1, 2])
                .with_acceleration(),
        )
        .with_damping(DampingSpec::new(0.05))
        .with_extra_seconds(2.0)
        .with_final_period();

    let outcome = procedure.run(&mut solver).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.total_steps, 300 + 200);
    assert_eq!(solver.calls.len(), 500);
    assert!(solver.calls.iter().all(|c| c.dt == Some(0.01)));

    let damping = solver.damping.unwrap();
    assert_eq!(Some(damping), outcome.damping);
    assert_relative_eq!(damping.ratio_at(10.0), 0.05, epsilon = 1e-12);
    assert_relative_eq!(damping.ratio_at(50.0), 0.05, epsilon = 1e-12);

    assert_eq!(outcome.residual_drift, Some(vec![0.0, 0.0]));
    assert_relative_eq!(
        outcome.final_period.unwrap(),
        2.0 * std::f64::consts::PI / 10.0,
        epsilon = 1e-12
    );

    let absolute = outcome.absolute_acceleration.unwrap();
    assert_relative_eq!(absolute[100][2], 2.0, epsilon = 1e-9);
    assert_eq!(absolute[400][2], 0.0);
}

#[test]
fn test_transient_damping_needs_enough_modes() {
    let mut solver = ScriptedSolver::stack(1, 3.0);
    solver.eigenvalues = vec![100.0];
    let record = GroundMotion::new(0.01, vec![0.0; 10]).unwrap();

    let err = Procedure::transient(record, 0.01).run(&mut solver).unwrap_err();

    assert!(matches!(err, DriverError::Solver(_)));
    assert!(solver.calls.is_empty());
}

#[test]
fn test_query_failure_aborts_with_partial_series() {
    let mut solver = ScriptedSolver::stack(1, 3.0).with_element(1, 0, 1);
    solver.force_error_after = Some((1, 2));

    let outcome = Procedure::pushover(1, 1, 0.05, 0.01)
        .with_recorder(RecorderSpec::new().with_element_forces("base", vec![1]))
        .run(&mut solver)
        .unwrap();

    assert_eq!(outcome.steps_completed, 2);
    assert_eq!(outcome.series.len(), 3);
    assert!(matches!(
        outcome.status,
        ProcedureStatus::Aborted {
            step: 2,
            reason: AbortReason::ResponseQuery(_),
            ..
        }
    ));
}

#[test]
fn test_drift_with_single_node_is_rejected() {
    let mut solver = ScriptedSolver::stack(1, 3.0);
    let err = Procedure::pushover(1, 1, 0.05, 0.01)
        .with_recorder(RecorderSpec::new().with_story_nodes(vec![1]))
        .run(&mut solver)
        .unwrap_err();

    assert!(matches!(err, DriverError::InvalidTracking(_)));
    assert!(solver.calls.is_empty());
}

#[test]
fn test_recorded_strut_is_rejected() {
    let mut solver = ScriptedSolver::stack(1, 3.0)
        .with_element(5, 0, 1)
        .with_element(6, 0, 1);
    let err = Procedure::pushover(1, 1, 0.05, 0.01)
        .with_recorder(RecorderSpec::new().with_element_forces("struts", vec![6]))
        .with_struts(vec![StrutPair::new(5, 6, 0.01)])
        .run(&mut solver)
        .unwrap_err();

    assert!(matches!(err, DriverError::InvalidTracking(_)));
}

#[test]
fn test_batch_runs_independent_solvers() {
    let record = GroundMotion::new(0.01, vec![0.5; 50]).unwrap();
    let base = Procedure::transient(record, 0.01).with_label("gm");
    let runs = ida_procedures(&base, &[0.5, 1.0, 2.0]).unwrap();

    let results = run_batch(&runs, |index| {
        let mut solver = ScriptedSolver::stack(2, 3.0);
        if index == 1 {
            solver.never_converge_at.insert(10);
        }
        Ok(solver)
    });

    assert_eq!(results.len(), 3);
    let outcomes: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(outcomes[0].procedure, "gm@0.5");
    assert!(outcomes[0].is_completed());
    assert_eq!(outcomes[1].steps_completed, 10);
    assert!(outcomes[2].is_completed());
}
