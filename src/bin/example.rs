//! Seismic Driver Example - Three-Story Infilled Frame

use anyhow::Result;
use seismic_driver::prelude::*;

const STORIES: usize = 3;
const STORY_HEIGHT: f64 = 3.0;
const FLOOR_MASS: f64 = 20.0; // t
const G: f64 = 9.81;

/// Shear building with one pair of infill struts per story
///
/// ```text
///   3 ===========    springs 1..3, struts 11/12, 21/22, 31/32
///     |  \ /  |
///   2 ===========
///     |  / \  |
///   1 ===========
///     |  \ /  |
///   0 /////////////
/// ```
fn infilled_frame() -> Result<ShearBuilding> {
    let mut model = ShearBuilding::uniform(
        STORIES,
        STORY_HEIGHT,
        FLOOR_MASS,
        Bilinear::new(20_000.0, 150.0, 0.02),
    )?;
    for story in 1..=STORIES {
        // Both diagonals act on the same pair of floors
        model.add_element(10 * story + 1, Element::strut(story - 1, story, 8_000.0))?;
        model.add_element(10 * story + 2, Element::strut(story - 1, story, 8_000.0))?;
    }
    Ok(model)
}

fn strut_pairs() -> Result<Vec<StrutPair>> {
    let elements: Vec<(ElementTag, ElementTag)> = (1..=STORIES)
        .map(|story| (10 * story + 1, 10 * story + 2))
        .collect();
    Ok(StrutPair::zip(&elements, &[0.004; STORIES])?)
}

fn story_recorder() -> RecorderSpec {
    RecorderSpec::new()
        .with_story_nodes((0..=STORIES).collect())
        .with_element_forces("base", vec![1])
}

/// Two-second sine burst followed by silence, in g
fn synthetic_record() -> Result<GroundMotion> {
    let dt = 0.01;
    let values = (0..400)
        .map(|i| {
            let t = i as f64 * dt;
            if t < 2.0 {
                0.35 * (2.0 * std::f64::consts::PI * 1.5 * t).sin()
            } else {
                0.0
            }
        })
        .collect();
    Ok(GroundMotion::new(dt, values)?.with_factor(G))
}

fn main() -> Result<()> {
    env_logger::init();

    println!("=== Seismic Driver Example: Three-Story Infilled Frame ===\n");

    let height = STORIES as f64 * STORY_HEIGHT;
    let weight = STORIES as f64 * FLOOR_MASS * G;

    // ========================
    // Gravity, then pushover
    // ========================
    let mut model = infilled_frame()?;
    let gravity = Procedure::gravity(0.1, 10).run(&mut model)?;
    println!("Gravity: {:?} after {} steps", gravity.status, gravity.steps_completed);

    model.hold_loads();
    model.set_triangular_pattern();
    let pushover = Procedure::pushover(STORIES, 1, 0.02 * height, 0.001)
        .with_recorder(story_recorder())
        .with_struts(strut_pairs()?)
        .run(&mut model)?;

    println!(
        "Pushover: {:?}, {} of {} steps, {} recovered by fallback",
        pushover.status, pushover.steps_completed, pushover.total_steps, pushover.recovered_steps
    );
    println!("  Strut failures at steps {:?}", pushover.failure_steps);
    if let Some(curve) = pushover.capacity_curve("base", 0) {
        let normalized = curve.normalized(height, weight);
        if let Some((drift, coefficient)) = normalized.peak() {
            println!("  Peak V/W = {:.3} at roof drift {:.2}%", coefficient, drift);
        }
    }

    // ========================
    // Cyclic pushover
    // ========================
    let mut model = infilled_frame()?;
    model.set_triangular_pattern();
    let peaks = vec![0.03, -0.03, 0.06, -0.06, 0.09, -0.09, 0.0];
    let cyclic = Procedure::cyclic(STORIES, 1, peaks, 0.001)
        .with_recorder(story_recorder())
        .run(&mut model)?;
    println!(
        "\nCyclic: {:?}, {} steps, final roof displacement {:.4} m",
        cyclic.status,
        cyclic.steps_completed,
        cyclic.last_control_value().unwrap_or(f64::NAN)
    );

    // ========================
    // Transient and IDA
    // ========================
    let record = synthetic_record()?;
    let transient = Procedure::transient(record, 0.01)
        .with_recorder(story_recorder().with_velocity().with_acceleration())
        .with_struts(strut_pairs()?)
        .with_extra_seconds(2.0)
        .with_final_period();

    let mut model = infilled_frame()?;
    let outcome = transient.run(&mut model)?;
    println!(
        "\nTransient: {:?}, {} steps, struts failed at {:?}",
        outcome.status, outcome.steps_completed, outcome.failure_steps
    );
    if let Some(residual) = &outcome.residual_drift {
        println!("  Residual drifts: {:?}", residual);
    }
    if let Some(period) = outcome.final_period {
        println!("  Final period: {:.3} s", period);
    }

    let runs = ida_procedures(&transient, &[0.25, 0.5, 1.0, 1.5])?;
    let results = run_batch(&runs, |_| {
        infilled_frame().map_err(|e| DriverError::InvalidInput(e.to_string()))
    });
    println!("\nIDA:");
    for (procedure, result) in runs.iter().zip(results) {
        match result {
            Ok(outcome) => {
                let peak = outcome
                    .series
                    .drift
                    .as_ref()
                    .map(|rows| {
                        rows.iter()
                            .flatten()
                            .fold(0.0_f64, |acc, d| acc.max(d.abs()))
                    })
                    .unwrap_or(0.0);
                println!(
                    "  {:<16} {:?}, peak drift {:.4}, {} strut failures",
                    procedure.label,
                    outcome.status,
                    peak,
                    outcome.failure_steps.len()
                );
            }
            Err(e) => println!("  {:<16} failed: {}", procedure.label, e),
        }
    }

    Ok(())
}
