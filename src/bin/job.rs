//! Job runner: read a JSON job, run its procedures in order, print outcomes as JSON
//!
//! Usage: `seismic-job job.json` or `SEISMIC_JOB=job.json seismic-job`

use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use seismic_driver::prelude::*;

/// One stage of a job
#[derive(Debug, Deserialize)]
struct Stage {
    procedure: Procedure,
    /// Hold current loads constant before this stage
    #[serde(default)]
    hold_loads: bool,
    /// Use a mass-times-height lateral pattern for this stage
    #[serde(default)]
    triangular_pattern: bool,
}

#[derive(Debug, Deserialize)]
struct Job {
    model: BuildingSpec,
    stages: Vec<Stage>,
    /// Stop at the first aborted stage
    #[serde(default = "default_stop_on_abort")]
    stop_on_abort: bool,
}

fn default_stop_on_abort() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct JobReport {
    outcomes: Vec<AnalysisOutcome>,
    aborted: bool,
}

fn job_path() -> Result<String> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SEISMIC_JOB").ok())
        .context("no job file given (argument or SEISMIC_JOB)")
}

fn main() -> Result<()> {
    env_logger::init();

    let path = job_path()?;
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let job: Job = serde_json::from_str(&text).with_context(|| format!("parsing {}", path))?;

    let mut model = ShearBuilding::from_spec(&job.model)?;
    log::info!(
        "Loaded model with {} equations and {} stages",
        model.num_equations(),
        job.stages.len()
    );

    let mut report = JobReport {
        outcomes: Vec::new(),
        aborted: false,
    };
    for stage in &job.stages {
        if stage.hold_loads {
            model.hold_loads();
        }
        if stage.triangular_pattern {
            model.set_triangular_pattern();
        }
        let outcome = stage.procedure.run(&mut model)?;
        let aborted = outcome.is_aborted();
        report.outcomes.push(outcome);
        if aborted {
            report.aborted = true;
            if job.stop_on_abort {
                break;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
