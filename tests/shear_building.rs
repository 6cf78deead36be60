//! End-to-end procedures on the shear-building backend

use approx::assert_relative_eq;
use seismic_driver::prelude::*;

fn single_story(k0: f64, fy: f64, b: f64) -> ShearBuilding {
    let mut model = ShearBuilding::uniform(1, 3.0, 1.0, Bilinear::new(k0, fy, b)).unwrap();
    model.add_lateral_load(1, 1.0).unwrap();
    model
}

fn three_story() -> ShearBuilding {
    let mut model =
        ShearBuilding::uniform(3, 3.0, 10.0, Bilinear::new(5000.0, 60.0, 0.05)).unwrap();
    model.set_triangular_pattern();
    model
}

#[test]
fn test_bilinear_pushover_capacity_curve() {
    let mut model = single_story(100.0, 1.0, 0.1);
    let outcome = Procedure::pushover(1, 1, 0.02, 0.001)
        .with_recorder(RecorderSpec::new().with_element_forces("base", vec![1]))
        .run(&mut model)
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.series.len(), 21);
    let curve = outcome.capacity_curve("base", 0).unwrap();
    // Elastic branch
    assert_relative_eq!(curve.base_shear[5], 0.5, epsilon = 1e-9);
    // Hardening branch: fy + b*k0*(u - uy)
    assert_relative_eq!(curve.base_shear[20], 1.1, epsilon = 1e-9);
    // Load factor equals base shear for a unit reference load
    assert_relative_eq!(outcome.series.pseudo_time[20], 1.1, epsilon = 1e-9);
}

#[test]
fn test_cyclic_pushover_returns_to_zero_with_residual_force() {
    let mut model = single_story(100.0, 1.0, 0.01);
    let outcome = Procedure::cyclic(1, 1, vec![0.03, 0.0], 0.001)
        .with_recorder(RecorderSpec::new().with_element_forces("base", vec![1]))
        .run(&mut model)
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.steps_completed, 60);
    let curve = outcome.capacity_curve("base", 0).unwrap();
    // Post-yield tangent is 1.0: fy + 1.0 * (0.03 - 0.01)
    assert_relative_eq!(curve.base_shear[30], 1.02, epsilon = 1e-9);
    // Elastic over 2 fy down to u = 0.01, then reverse hardening
    assert_relative_eq!(curve.base_shear[60], -0.99, epsilon = 1e-9);
    assert_relative_eq!(outcome.last_control_value().unwrap(), 0.0, epsilon = 1e-9);
}

/// One iteration with a displacement test can never converge
fn starved_config() -> AnalysisConfiguration {
    AnalysisConfiguration::pushover(3, 1, 0.001)
        .with_max_iter(1)
        .with_test(TestKind::NormDispIncr)
}

#[test]
fn test_fallback_recovers_starved_default() {
    let mut model = three_story();
    let procedure = Procedure::pushover(3, 1, 0.03, 0.001)
        .with_config(starved_config());

    let outcome = procedure.run(&mut model).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.recovered_steps, outcome.steps_completed);
    assert_eq!(model.active_test(), Some(&procedure.defaults().test));
    assert_eq!(model.active_algorithm(), Some(&procedure.defaults().algorithm));
}

#[test]
fn test_exhausted_ladder_aborts_with_partial_result() {
    let mut model = three_story();
    let procedure = Procedure::pushover(3, 1, 0.03, 0.001)
        .with_config(starved_config())
        .with_ladder(FallbackLadder::none());

    let outcome = procedure.run(&mut model).unwrap();

    assert!(outcome.is_aborted());
    assert_eq!(outcome.steps_completed, 0);
    assert_eq!(outcome.series.len(), 1);
    // The failed step left no trace in the model
    assert_eq!(model.node_displacement(3, 1).unwrap(), 0.0);
}

#[test]
fn test_struts_removed_during_pushover() {
    let mut model = three_story();
    model.add_element(11, Element::strut(0, 1, 3000.0)).unwrap();
    model.add_element(12, Element::strut(0, 1, 3000.0)).unwrap();

    let outcome = Procedure::pushover(3, 1, 0.09, 0.001)
        .with_recorder(RecorderSpec::new().with_story_nodes(vec![0, 1, 2, 3]))
        .with_struts(vec![StrutPair::new(11, 12, 0.002)])
        .run(&mut model)
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.failure_steps.len(), 1);
    assert!(model.is_removed(11) && model.is_removed(12));

    let step = outcome.failure_steps[0];
    let drift = outcome.series.drift.as_ref().unwrap();
    assert!(drift[step + 1][0].abs() > 0.002);
    assert!(drift[step][0].abs() <= 0.002);
}

#[test]
fn test_transient_at_rest_stays_at_rest() {
    let mut model = three_story();
    let record = GroundMotion::new(0.02, vec![0.0; 50]).unwrap();
    let outcome = Procedure::transient(record, 0.01)
        .with_recorder(
            RecorderSpec::new()
                .with_story_nodes(vec![0, 1, 2, 3])
                .with_acceleration(),
        )
        .with_extra_seconds(0.5)
        .with_final_period()
        .run(&mut model)
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.total_steps, 100 + 50);
    assert_eq!(outcome.residual_drift, Some(vec![0.0, 0.0, 0.0]));
    assert_relative_eq!(outcome.series.pseudo_time[150], 1.5, epsilon = 1e-9);

    let eig = model.eigenvalues(1).unwrap();
    assert_relative_eq!(
        outcome.final_period.unwrap(),
        2.0 * std::f64::consts::PI / eig[0].sqrt(),
        epsilon = 1e-12
    );
}

#[test]
fn test_transient_response_to_pulse() {
    let mut model = three_story();
    let values = (0..100)
        .map(|i| (2.0 * std::f64::consts::PI * i as f64 * 0.01 / 0.5).sin())
        .collect();
    let record = GroundMotion::new(0.01, values).unwrap().with_factor(9.81 * 0.3);

    let outcome = Procedure::transient(record.clone(), 0.01)
        .with_recorder(
            RecorderSpec::new()
                .with_story_nodes(vec![0, 1, 2, 3])
                .with_velocity()
                .with_acceleration(),
        )
        .with_extra_seconds(1.0)
        .run(&mut model)
        .unwrap();

    assert!(outcome.is_completed());
    let drift = outcome.series.drift.as_ref().unwrap();
    let peak = drift.iter().flatten().fold(0.0_f64, |acc, d| acc.max(d.abs()));
    assert!(peak > 0.0);

    let damping = outcome.damping.unwrap();
    assert!(damping.mass_proportional > 0.0 && damping.stiffness_initial > 0.0);

    let relative = outcome.series.acceleration.as_ref().unwrap();
    let absolute = outcome.absolute_acceleration.as_ref().unwrap();
    let t = outcome.series.pseudo_time[30];
    assert_relative_eq!(
        absolute[30][3],
        relative[30][3] + record.acceleration_at(t),
        epsilon = 1e-9
    );
}

#[test]
fn test_ida_batch_on_fresh_models() {
    let values = (0..100)
        .map(|i| (2.0 * std::f64::consts::PI * i as f64 * 0.01 / 0.5).sin())
        .collect();
    let record = GroundMotion::new(0.01, values).unwrap().with_factor(9.81);
    let base = Procedure::transient(record, 0.01)
        .with_recorder(RecorderSpec::new().with_story_nodes(vec![0, 1, 2, 3]));
    let runs = ida_procedures(&base, &[0.1, 0.2, 0.4]).unwrap();

    let results = run_batch(&runs, |_| Ok(three_story()));

    let peaks: Vec<f64> = results
        .into_iter()
        .map(|r| {
            let outcome = r.unwrap();
            assert!(outcome.is_completed());
            outcome
                .series
                .drift
                .unwrap()
                .iter()
                .flatten()
                .fold(0.0_f64, |acc, d| acc.max(d.abs()))
        })
        .collect();
    assert!(peaks[0] < peaks[1] && peaks[1] < peaks[2]);
}

#[test]
fn test_deserialized_bad_record_is_rejected_before_stepping() {
    for json in [
        r#"{"dt":0.0,"values":[0.1,-0.2,0.3]}"#,
        r#"{"dt":-0.01,"values":[0.1,-0.2,0.3]}"#,
    ] {
        let record: GroundMotion = serde_json::from_str(json).unwrap();
        let mut model = three_story();
        let err = Procedure::transient(record, 0.01)
            .with_extra_seconds(0.05)
            .run(&mut model)
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidInput(_)));
        assert_eq!(model.current_time(), 0.0);
    }
}

#[test]
fn test_deserialized_pushover_away_from_target_is_rejected() {
    let mut procedure = Procedure::pushover(3, 1, 0.05, 0.01);
    procedure.plan = ControlPlan::Monotonic {
        node: 3,
        dof: 1,
        target: 0.05,
        increment: -0.01,
    };
    let json = serde_json::to_string(&procedure).unwrap();
    let loaded: Procedure = serde_json::from_str(&json).unwrap();

    let mut model = three_story();
    let err = loaded.run(&mut model).unwrap_err();
    assert!(matches!(err, DriverError::InvalidInput(_)));
    assert_eq!(model.node_displacement(3, 1).unwrap(), 0.0);
}
