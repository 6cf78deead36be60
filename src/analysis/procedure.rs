//! Step driver
//!
//! A [`Procedure`] couples a [`ControlPlan`] (what to advance and how far) with
//! the default analysis configuration, a fallback ladder and the channels to
//! record. Gravity, monotonic pushover, cyclic pushover and transient runs all
//! go through the same loop:
//!
//! ```text
//! Idle -> Running -> Completed
//!                 -> Aborted   (ladder exhausted or response query failed)
//! ```
//!
//! Partial series are always returned, truncated after the last converged
//! step.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::config::{AnalysisConfiguration, Integrator};
use crate::analysis::recovery::{ControlChannel, FallbackLadder, RecoveryEngine, StepArgs};
use crate::damping::{DampingSpec, RayleighDamping};
use crate::error::{DriverError, DriverResult};
use crate::ground_motion::GroundMotion;
use crate::math::{self, Rounding};
use crate::recorder::{RecorderSpec, ResponseRecorder};
use crate::removal::{RemovalModel, StrutPair};
use crate::results::{AbortReason, AnalysisOutcome, ProcedureStatus};
use crate::solver::{NodeTag, Solver};

/// What a procedure advances, and how far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlPlan {
    /// Fixed number of load-factor increments
    LoadControl { increment: f64, steps: usize },
    /// Push one node DOF to `target` in increments of `increment`
    Monotonic {
        node: NodeTag,
        dof: usize,
        target: f64,
        increment: f64,
    },
    /// Push one node DOF through an ordered list of peaks
    Cyclic {
        node: NodeTag,
        dof: usize,
        peaks: Vec<f64>,
        increment: f64,
    },
    /// Step through a ground-motion record, then optionally a free-vibration tail
    Transient {
        record: GroundMotion,
        /// Analysis time step
        dt: f64,
        /// Length of the zero-input tail
        extra_seconds: f64,
        /// DOF of the uniform excitation
        excitation_dof: usize,
        /// Rayleigh calibration
        damping: DampingSpec,
        /// Compute the first-mode period after the run
        final_period: bool,
    },
}

impl ControlPlan {
    /// Control value reported for each step
    pub fn control_channel(&self) -> ControlChannel {
        match *self {
            ControlPlan::Monotonic { node, dof, .. } | ControlPlan::Cyclic { node, dof, .. } => {
                ControlChannel::NodeDof { node, dof }
            }
            ControlPlan::LoadControl { .. } | ControlPlan::Transient { .. } => {
                ControlChannel::PseudoTime
            }
        }
    }

    /// Steps of a transient plan: record part and tail
    pub fn transient_steps(&self) -> Option<(usize, usize)> {
        match self {
            ControlPlan::Transient {
                record,
                dt,
                extra_seconds,
                ..
            } => Some((
                math::step_count(record.duration(), *dt, Rounding::Floor),
                math::step_count(*extra_seconds, *dt, Rounding::Floor),
            )),
            _ => None,
        }
    }

    /// Segments of a cyclic plan starting from `start`: (target, steps)
    pub fn cyclic_segments(&self, start: f64) -> Vec<(f64, usize)> {
        let ControlPlan::Cyclic {
            peaks, increment, ..
        } = self
        else {
            return Vec::new();
        };
        let mut current = start;
        peaks
            .iter()
            .map(|&target| {
                let steps = math::step_count(target - current, *increment, Rounding::Ceil);
                current = target;
                (target, steps)
            })
            .collect()
    }

    /// Planned step count; cyclic plans count from `start`
    pub fn planned_steps(&self, start: f64) -> usize {
        match self {
            ControlPlan::LoadControl { steps, .. } => *steps,
            ControlPlan::Monotonic {
                target, increment, ..
            } => math::step_count(*target, *increment, Rounding::Floor),
            ControlPlan::Cyclic { .. } => {
                self.cyclic_segments(start).iter().map(|(_, n)| n).sum()
            }
            ControlPlan::Transient { .. } => self
                .transient_steps()
                .map_or(0, |(record, tail)| record + tail),
        }
    }

    fn validate(&self) -> DriverResult<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value != 0.0 {
                Ok(())
            } else {
                Err(DriverError::InvalidInput(format!(
                    "{} must be finite and non-zero, got {}",
                    name, value
                )))
            }
        };
        match self {
            ControlPlan::LoadControl { increment, .. } => positive("load increment", *increment),
            ControlPlan::Monotonic {
                target, increment, ..
            } => {
                positive("displacement increment", *increment)?;
                if !target.is_finite() {
                    return Err(DriverError::InvalidInput(
                        "target displacement is not finite".into(),
                    ));
                }
                if target * increment < 0.0 {
                    return Err(DriverError::InvalidInput(format!(
                        "increment {} points away from target {}",
                        increment, target
                    )));
                }
                Ok(())
            }
            ControlPlan::Cyclic {
                peaks, increment, ..
            } => {
                positive("displacement increment", *increment)?;
                if peaks.iter().all(|p| p.is_finite()) {
                    Ok(())
                } else {
                    Err(DriverError::InvalidInput("cyclic peaks must be finite".into()))
                }
            }
            ControlPlan::Transient {
                record,
                dt,
                extra_seconds,
                damping,
                ..
            } => {
                record.validate()?;
                if !(*dt > 0.0 && dt.is_finite()) {
                    return Err(DriverError::InvalidInput(format!(
                        "analysis time step must be positive, got {}",
                        dt
                    )));
                }
                if !(*extra_seconds >= 0.0) {
                    return Err(DriverError::InvalidInput(format!(
                        "free-vibration tail must not be negative, got {}",
                        extra_seconds
                    )));
                }
                if !(damping.ratio >= 0.0) {
                    return Err(DriverError::InvalidInput(format!(
                        "damping ratio must not be negative, got {}",
                        damping.ratio
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// One analysis procedure, ready to run against any solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    /// Name used in logs and outcomes
    pub label: String,
    /// Control variable and extent
    pub plan: ControlPlan,
    /// Default configuration, restored at every step boundary
    pub config: AnalysisConfiguration,
    /// Fallbacks tried on non-convergence
    #[serde(default)]
    pub ladder: FallbackLadder,
    /// Channels to record
    #[serde(default)]
    pub recorder: RecorderSpec,
    /// Strut pairs subject to removal
    #[serde(default)]
    pub struts: Vec<StrutPair>,
}

impl Procedure {
    /// Load-controlled static analysis, e.g. gravity in `steps` increments
    pub fn gravity(increment: f64, steps: usize) -> Self {
        Self {
            label: "gravity".to_string(),
            plan: ControlPlan::LoadControl { increment, steps },
            config: AnalysisConfiguration::gravity(increment),
            ladder: FallbackLadder::standard(),
            recorder: RecorderSpec::default(),
            struts: Vec::new(),
        }
    }

    /// Monotonic displacement-controlled pushover to `target`
    pub fn pushover(node: NodeTag, dof: usize, target: f64, increment: f64) -> Self {
        let increment = increment.abs().copysign(target);
        Self {
            label: "pushover".to_string(),
            plan: ControlPlan::Monotonic {
                node,
                dof,
                target,
                increment,
            },
            config: AnalysisConfiguration::pushover(node, dof, increment),
            ladder: FallbackLadder::standard(),
            recorder: RecorderSpec::default().with_nodes(vec![node]),
            struts: Vec::new(),
        }
    }

    /// Cyclic displacement-controlled pushover through `peaks`
    pub fn cyclic(node: NodeTag, dof: usize, peaks: Vec<f64>, increment: f64) -> Self {
        let increment = increment.abs();
        Self {
            label: "cyclic".to_string(),
            plan: ControlPlan::Cyclic {
                node,
                dof,
                peaks,
                increment,
            },
            config: AnalysisConfiguration::cyclic(node, dof, increment),
            ladder: FallbackLadder::standard(),
            recorder: RecorderSpec::default().with_nodes(vec![node]),
            struts: Vec::new(),
        }
    }

    /// Transient response to `record` with time step `dt`
    pub fn transient(record: GroundMotion, dt: f64) -> Self {
        Self {
            label: "transient".to_string(),
            plan: ControlPlan::Transient {
                record,
                dt,
                extra_seconds: 0.0,
                excitation_dof: 1,
                damping: DampingSpec::default(),
                final_period: false,
            },
            config: AnalysisConfiguration::transient(),
            ladder: FallbackLadder::standard(),
            recorder: RecorderSpec::default(),
            struts: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Replace the default configuration; the integrator still follows the plan
    pub fn with_config(mut self, config: AnalysisConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn with_ladder(mut self, ladder: FallbackLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderSpec) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_struts(mut self, struts: Vec<StrutPair>) -> Self {
        self.struts = struts;
        self
    }

    /// Append a zero-input tail (transient only)
    pub fn with_extra_seconds(mut self, seconds: f64) -> Self {
        if let ControlPlan::Transient { extra_seconds, .. } = &mut self.plan {
            *extra_seconds = seconds;
        }
        self
    }

    /// Set the Rayleigh calibration (transient only)
    pub fn with_damping(mut self, spec: DampingSpec) -> Self {
        if let ControlPlan::Transient { damping, .. } = &mut self.plan {
            *damping = spec;
        }
        self
    }

    /// Report the first-mode period after the run (transient only)
    pub fn with_final_period(mut self) -> Self {
        if let ControlPlan::Transient { final_period, .. } = &mut self.plan {
            *final_period = true;
        }
        self
    }

    /// Default configuration with the integrator set from the plan
    pub fn defaults(&self) -> AnalysisConfiguration {
        match self.plan {
            ControlPlan::LoadControl { increment, .. } => self
                .config
                .clone()
                .with_integrator(Integrator::LoadControl { increment }),
            ControlPlan::Monotonic {
                node,
                dof,
                increment,
                ..
            }
            | ControlPlan::Cyclic {
                node,
                dof,
                increment,
                ..
            } => self
                .config
                .clone()
                .with_integrator(Integrator::DisplacementControl {
                    node,
                    dof,
                    increment,
                }),
            ControlPlan::Transient { .. } => self.config.clone(),
        }
    }

    /// Run the procedure against `solver`.
    ///
    /// Setup problems (bad tracking, invalid plan) are returned as errors.
    /// Non-convergence is not an error: the outcome is returned with an
    /// [`ProcedureStatus::Aborted`] status and the partial series.
    pub fn run<S: Solver + ?Sized>(&self, solver: &mut S) -> DriverResult<AnalysisOutcome> {
        self.plan.validate()?;
        let defaults = self.defaults();
        let control = self.plan.control_channel();

        solver.reset_analysis();

        let damping = match &self.plan {
            ControlPlan::Transient {
                record,
                excitation_dof,
                damping,
                ..
            } => Some(Self::prepare_transient(solver, record, *excitation_dof, damping)?),
            _ => None,
        };

        solver.apply_configuration(&defaults)?;

        let start = control.read(&*solver).map_err(DriverError::from_query)?;
        let total_steps = self.plan.planned_steps(start);
        let slack = match &self.plan {
            ControlPlan::Cyclic { peaks, .. } => peaks.len(),
            _ => 0,
        };

        let removal = RemovalModel::new(
            &self.struts,
            &*solver,
            self.recorder.dof,
            self.recorder.vertical_axis,
        )?;
        if let Some(tag) = self
            .recorder
            .tracked_elements()
            .find(|tag| removal.elements().any(|e| e == *tag))
        {
            return Err(DriverError::InvalidTracking(format!(
                "element {} is both recorded and subject to removal",
                tag
            )));
        }
        let recorder = ResponseRecorder::new(self.recorder.clone(), &*solver, total_steps + slack)?;

        info!(
            "{}: starting, {} steps planned, control value {}",
            self.label, total_steps, start
        );

        let mut stepper = Stepper {
            engine: RecoveryEngine::new(self.ladder.clone()),
            recorder,
            removal,
            control,
            state: DriverState::Idle,
            step: 0,
            recovered: 0,
            abort: None,
        };
        stepper.start(solver, start)?;

        match &self.plan {
            ControlPlan::LoadControl { steps, .. } => {
                stepper.run_segment(solver, &defaults, *steps, None)?;
            }
            ControlPlan::Monotonic { .. } => {
                stepper.run_segment(solver, &defaults, total_steps, None)?;
            }
            ControlPlan::Cyclic {
                node,
                dof,
                peaks,
                increment,
            } => {
                for &target in peaks {
                    if stepper.state != DriverState::Running {
                        break;
                    }
                    let current = solver
                        .node_displacement(*node, *dof)
                        .map_err(DriverError::from_query)?;
                    let steps = math::step_count(target - current, *increment, Rounding::Ceil);
                    let signed = increment.copysign(target - current);
                    debug!(
                        "{}: segment to {} from {}, {} steps of {}",
                        self.label, target, current, steps, signed
                    );
                    if steps == 0 {
                        continue;
                    }
                    let segment = defaults.clone().with_integrator(Integrator::DisplacementControl {
                        node: *node,
                        dof: *dof,
                        increment: signed,
                    });
                    solver.set_integrator(&segment.integrator)?;
                    stepper.run_segment(solver, &segment, steps, None)?;
                }
            }
            ControlPlan::Transient { dt, .. } => {
                stepper.run_segment(solver, &defaults, total_steps, Some(*dt))?;
            }
        }

        let outcome = stepper.finish(&self.label, total_steps, damping);
        Ok(self.post_process(solver, outcome))
    }

    fn prepare_transient<S: Solver + ?Sized>(
        solver: &mut S,
        record: &GroundMotion,
        excitation_dof: usize,
        spec: &DampingSpec,
    ) -> DriverResult<RayleighDamping> {
        solver.define_ground_motion(record, excitation_dof)?;
        let eigenvalues = solver.eigenvalues(spec.modes_required())?;
        let damping = RayleighDamping::from_eigenvalues(&eigenvalues, spec)?;
        solver.set_rayleigh_damping(&damping)?;
        debug!(
            "Rayleigh damping: alpha = {:.6e}, beta_init = {:.6e}, beta_curr = {:.6e}",
            damping.mass_proportional, damping.stiffness_initial, damping.stiffness_current
        );
        Ok(damping)
    }

    fn post_process<S: Solver + ?Sized>(
        &self,
        solver: &mut S,
        mut outcome: AnalysisOutcome,
    ) -> AnalysisOutcome {
        let ControlPlan::Transient {
            record,
            damping,
            final_period,
            ..
        } = &self.plan
        else {
            return outcome;
        };

        if let Some((record_steps, tail)) = self.plan.transient_steps() {
            if tail > 0 && outcome.is_completed() {
                outcome.residual_drift = outcome.series.residual_drift(record_steps + 1);
            }
        }
        outcome.absolute_acceleration = outcome.series.absolute_acceleration(record);

        if *final_period {
            outcome.final_period = match solver.eigenvalues(damping.modes_required()) {
                Ok(values) => values
                    .get(damping.modes[0])
                    .copied()
                    .and_then(math::period_from_eigenvalue),
                Err(e) => {
                    warn!("{}: final period not available: {}", self.label, e);
                    None
                }
            };
        }
        outcome
    }
}

/// Mutable loop state of one run
struct Stepper {
    engine: RecoveryEngine,
    recorder: ResponseRecorder,
    removal: RemovalModel,
    control: ControlChannel,
    state: DriverState,
    /// Steps converged so far, also the index of the next step
    step: usize,
    recovered: usize,
    abort: Option<(usize, f64, AbortReason)>,
}

impl Stepper {
    fn start<S: Solver + ?Sized>(&mut self, solver: &mut S, start: f64) -> DriverResult<()> {
        self.recorder.record(solver, 0, start)?;
        let forces = self.removal.forces(&*solver)?;
        self.recorder.record_pairs(0, &forces);
        self.transition(DriverState::Running);
        Ok(())
    }

    fn transition(&mut self, next: DriverState) {
        debug!("Driver state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Advance `steps` steps with `defaults`; stops early on abort
    fn run_segment<S: Solver + ?Sized>(
        &mut self,
        solver: &mut S,
        defaults: &AnalysisConfiguration,
        steps: usize,
        dt: Option<f64>,
    ) -> DriverResult<()> {
        for _ in 0..steps {
            if self.state != DriverState::Running {
                return Err(DriverError::PreconditionViolation(format!(
                    "step requested in state {:?}",
                    self.state
                )));
            }
            let args = StepArgs {
                index: self.step,
                dt,
                control: self.control,
            };
            let result = self.engine.attempt_step(solver, defaults, args);
            if !result.is_converged() {
                self.abort(result.step_index, result.control_value, AbortReason::NonConvergence);
                return Ok(());
            }
            if result.recovered_by.is_some() {
                self.recovered += 1;
            }

            match self.record(solver, result.step_index, result.control_value) {
                Ok(()) => {}
                Err(DriverError::Solver(e)) => {
                    self.abort(
                        result.step_index,
                        result.control_value,
                        AbortReason::ResponseQuery(e.to_string()),
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            debug!(
                "Step {} converged, control value {}",
                result.step_index, result.control_value
            );
            self.step += 1;
        }
        Ok(())
    }

    fn record<S: Solver + ?Sized>(
        &mut self,
        solver: &mut S,
        step: usize,
        control_value: f64,
    ) -> DriverResult<()> {
        let forces = self.removal.check_and_apply(solver, step)?;
        self.recorder.record_pairs(step + 1, &forces);
        self.recorder.record(solver, step + 1, control_value)
    }

    fn abort(&mut self, step: usize, control_value: f64, reason: AbortReason) {
        warn!(
            "Aborting at step {} (control value {}): {:?}",
            step, control_value, reason
        );
        self.abort = Some((step, control_value, reason));
        self.transition(DriverState::Aborted);
    }

    fn finish(
        mut self,
        label: &str,
        total_steps: usize,
        damping: Option<RayleighDamping>,
    ) -> AnalysisOutcome {
        let status = match self.abort.take() {
            Some((step, control_value, reason)) => ProcedureStatus::Aborted {
                step,
                control_value,
                reason,
            },
            None => {
                self.transition(DriverState::Completed);
                ProcedureStatus::Completed
            }
        };
        info!(
            "{}: {:?} after {} of {} steps ({} recovered)",
            label, self.state, self.step, total_steps, self.recovered
        );

        AnalysisOutcome {
            procedure: label.to_string(),
            status,
            steps_completed: self.step,
            total_steps,
            failure_steps: self.removal.failure_steps(),
            pairs: self.removal.pairs().to_vec(),
            recovered_steps: self.recovered,
            damping,
            final_period: None,
            residual_drift: None,
            absolute_acceleration: None,
            series: self.recorder.finish(self.step + 1),
        }
    }
}
