//! Numerical helpers shared by the procedures and the reference backend

use nalgebra::{DMatrix, DVector, SymmetricEigen};

pub type Mat = DMatrix<f64>;
pub type Vec = DVector<f64>;

/// Relative slack when turning a real ratio into a step count
const STEP_SNAP: f64 = 1e-9;

/// Rounding applied by [`step_count`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
}

/// Number of increments of size `increment` that cover `span`.
///
/// Ratios within a relative 1e-9 of an integer snap to it, so that
/// `0.3 / 0.1` gives 3 rather than 2 and `0.05 / 0.01` gives 5 rather than 6.
pub fn step_count(span: f64, increment: f64, rounding: Rounding) -> usize {
    if !(span.is_finite() && increment.is_finite()) || increment == 0.0 {
        return 0;
    }
    let ratio = (span / increment).abs();
    let nearest = ratio.round();
    if (ratio - nearest).abs() <= STEP_SNAP * nearest.max(1.0) {
        return nearest as usize;
    }
    match rounding {
        Rounding::Floor => ratio.floor() as usize,
        Rounding::Ceil => ratio.ceil() as usize,
    }
}

/// Natural period from an eigenvalue ω²
pub fn period_from_eigenvalue(eigenvalue: f64) -> Option<f64> {
    if eigenvalue > 0.0 && eigenvalue.is_finite() {
        Some(2.0 * std::f64::consts::PI / eigenvalue.sqrt())
    } else {
        None
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Solve a linear system using LU decomposition
pub fn solve_linear_system(a: &Mat, b: &Vec) -> Option<Vec> {
    a.clone().lu().solve(b)
}

/// Eigenvalues of `K φ = λ M φ` for a diagonal, positive mass matrix.
///
/// Returned in ascending order.
pub fn generalized_eigenvalues(k: &Mat, mass: &[f64]) -> Option<std::vec::Vec<f64>> {
    let n = k.nrows();
    if n == 0 || mass.len() != n || mass.iter().any(|&m| m <= 0.0) {
        return None;
    }
    let scale: std::vec::Vec<f64> = mass.iter().map(|m| 1.0 / m.sqrt()).collect();
    let a = Mat::from_fn(n, n, |i, j| k[(i, j)] * scale[i] * scale[j]);
    let eig = SymmetricEigen::new(a);
    let mut values: std::vec::Vec<f64> = eig.eigenvalues.iter().copied().collect();
    values.sort_by(|a, b| a.total_cmp(b));
    Some(values)
}
