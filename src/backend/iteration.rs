//! Equilibrium iterations for one step of the shear-building backend
//!
//! Each function leaves the committed state untouched unless the step
//! converges, in which case it commits displacements, velocities,
//! accelerations, the load factor or time, and the element states.

use crate::analysis::config::{Algorithm, AlgorithmKind, ConvergenceTest, TestKind};
use crate::error::{SolverError, SolverResult};
use crate::math::{self, Mat, Vec};

use super::ShearBuilding;

/// Iterations between tangent refreshes for `PeriodicNewton`
const PERIODIC_REFRESH: usize = 3;

/// Tracks the convergence measure across iterations of one step
struct TestMonitor {
    test: ConvergenceTest,
    reference: Option<f64>,
}

impl TestMonitor {
    fn new(test: &ConvergenceTest) -> Self {
        Self {
            test: *test,
            reference: None,
        }
    }

    /// `du` is the last correction, `unbalance` the residual after applying it
    fn converged(&mut self, du: &Vec, unbalance: &Vec) -> bool {
        let value = match self.test.kind {
            TestKind::NormUnbalance | TestKind::RelativeNormUnbalance => unbalance.norm(),
            TestKind::NormDispIncr | TestKind::RelativeNormDispIncr => du.norm(),
            TestKind::EnergyIncr | TestKind::RelativeEnergyIncr => 0.5 * du.dot(unbalance).abs(),
        };
        if !value.is_finite() {
            return false;
        }
        if !self.test.kind.is_relative() {
            return value < self.test.tolerance;
        }
        match self.reference {
            None => {
                self.reference = Some(value);
                value == 0.0
            }
            Some(reference) if reference == 0.0 => true,
            Some(reference) => value / reference < self.test.tolerance,
        }
    }
}

/// Chooses the iteration matrix according to the algorithm
struct MatrixPolicy {
    algorithm: Algorithm,
    cached: Option<Mat>,
}

impl MatrixPolicy {
    fn new(algorithm: &Algorithm) -> Self {
        Self {
            algorithm: *algorithm,
            cached: None,
        }
    }

    /// Stiffness to iterate with at iteration `iter`; `tangent` is lazily formed
    fn stiffness(&mut self, model: &ShearBuilding, iter: usize) -> Mat {
        if self.algorithm.initial {
            if self.cached.is_none() {
                self.cached = Some(model.assemble(true).0);
            }
        } else {
            let refresh = match self.algorithm.kind {
                AlgorithmKind::ModifiedNewton => iter == 0,
                AlgorithmKind::PeriodicNewton => iter % PERIODIC_REFRESH == 0,
                _ => true,
            };
            if refresh || self.cached.is_none() {
                self.cached = Some(model.assemble(false).0);
            }
        }
        self.cached.clone().unwrap_or_else(|| model.assemble(false).0)
    }
}

fn solve(k: &Mat, rhs: &Vec) -> SolverResult<Vec> {
    math::solve_linear_system(k, rhs).ok_or(SolverError::SingularMatrix)
}

/// One load-controlled step
pub(crate) fn load_control(
    model: &mut ShearBuilding,
    test: &ConvergenceTest,
    algorithm: &Algorithm,
    increment: f64,
) -> SolverResult<bool> {
    let lambda = model.state.load_factor + increment;
    let p = &model.held + model.reference_load() * lambda;
    let mut u = model.state.disp.clone();
    if model.num_equations() == 0 {
        model.state.load_factor = lambda;
        return Ok(true);
    }

    let mut monitor = TestMonitor::new(test);
    let mut policy = MatrixPolicy::new(algorithm);
    model.update_trial(&u);
    let mut unbalance = &p - model.assemble(false).1;

    for iter in 0..test.max_iterations {
        let k = policy.stiffness(model, iter);
        let du = solve(&k, &unbalance)?;
        u += &du;
        model.update_trial(&u);
        let new_unbalance = &p - model.assemble(false).1;
        if monitor.converged(&du, &new_unbalance) {
            model.state.disp = u;
            model.state.load_factor = lambda;
            model.commit_elements();
            return Ok(true);
        }
        unbalance = new_unbalance;
    }
    Ok(false)
}

/// One displacement-controlled step on equation `eq`
pub(crate) fn displacement_control(
    model: &mut ShearBuilding,
    test: &ConvergenceTest,
    algorithm: &Algorithm,
    eq: usize,
    increment: f64,
) -> SolverResult<bool> {
    let mut reference = model.reference_load();
    if reference.norm() == 0.0 {
        reference[eq] = 1.0;
    }
    let target = model.state.disp[eq] + increment;
    let mut lambda = model.state.load_factor;
    let mut u = model.state.disp.clone();

    let mut monitor = TestMonitor::new(test);
    let mut policy = MatrixPolicy::new(algorithm);
    model.update_trial(&u);
    let mut unbalance = &model.held + &reference * lambda - model.assemble(false).1;

    for iter in 0..test.max_iterations {
        let k = policy.stiffness(model, iter);
        let du_unbalance = solve(&k, &unbalance)?;
        let du_reference = solve(&k, &reference)?;
        if du_reference[eq].abs() < f64::EPSILON {
            return Err(SolverError::AnalysisFailed(
                "reference load does not move the control DOF".into(),
            ));
        }
        let dlambda = (target - u[eq] - du_unbalance[eq]) / du_reference[eq];
        let du = du_unbalance + &du_reference * dlambda;
        lambda += dlambda;
        u += &du;
        model.update_trial(&u);
        let new_unbalance = &model.held + &reference * lambda - model.assemble(false).1;
        if monitor.converged(&du, &new_unbalance) {
            model.state.disp = u;
            model.state.load_factor = lambda;
            model.commit_elements();
            return Ok(true);
        }
        unbalance = new_unbalance;
    }
    Ok(false)
}

/// One Newmark step of size `dt`
pub(crate) fn newmark(
    model: &mut ShearBuilding,
    test: &ConvergenceTest,
    algorithm: &Algorithm,
    gamma: f64,
    beta: f64,
    dt: f64,
) -> SolverResult<bool> {
    let n = model.num_equations();
    let t = model.state.time + dt;
    if n == 0 {
        model.state.time = t;
        return Ok(true);
    }

    let a0 = 1.0 / (beta * dt * dt);
    let a1 = gamma / (beta * dt);
    let a2 = 1.0 / (beta * dt);
    let a3 = 1.0 / (2.0 * beta) - 1.0;

    let masses = Vec::from_vec(model.masses());
    let m = Mat::from_diagonal(&masses);
    let ag = model.ground_acceleration(t);
    let p = model.applied_static_load() - &masses * ag;

    let (u_n, v_n, acc_n) = (
        model.state.disp.clone(),
        model.state.vel.clone(),
        model.state.acc.clone(),
    );
    let (alpha, beta_initial, beta_current) = model
        .rayleigh()
        .map_or((0.0, 0.0, 0.0), |d| {
            (d.mass_proportional, d.stiffness_initial, d.stiffness_current)
        });
    let k_initial = model.assemble(true).0;

    let kinematics = |u: &Vec| {
        let acc = (u - &u_n) * a0 - &v_n * a2 - &acc_n * a3;
        let vel = &v_n + (&acc_n * (1.0 - gamma) + &acc * gamma) * dt;
        (vel, acc)
    };
    let damping = |k_tangent: &Mat| &m * alpha + &k_initial * beta_initial + k_tangent * beta_current;

    let mut u = u_n.clone();
    model.update_trial(&u);
    let residual = |model: &ShearBuilding, u: &Vec| {
        let (k_tangent, r) = model.assemble(false);
        let (vel, acc) = kinematics(u);
        let c = damping(&k_tangent);
        (&p - &m * &acc - &c * &vel - r, c, vel, acc)
    };

    let mut monitor = TestMonitor::new(test);
    let mut policy = MatrixPolicy::new(algorithm);
    let (mut unbalance, mut c, _, _) = residual(&*model, &u);

    for iter in 0..test.max_iterations {
        let k = policy.stiffness(model, iter) + &m * a0 + &c * a1;
        let du = solve(&k, &unbalance)?;
        u += &du;
        model.update_trial(&u);
        let (new_unbalance, new_c, vel, acc) = residual(&*model, &u);
        if monitor.converged(&du, &new_unbalance) {
            model.state.disp = u;
            model.state.vel = vel;
            model.state.acc = acc;
            model.state.time = t;
            model.commit_elements();
            return Ok(true);
        }
        unbalance = new_unbalance;
        c = new_c;
    }
    Ok(false)
}
