//! Story springs and infill struts of the shear-building backend

use serde::{Deserialize, Serialize};

use crate::solver::NodeTag;

/// Floor of a shear building: one lateral DOF, lumped mass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Floor {
    /// Horizontal coordinate
    pub x: f64,
    /// Height
    pub y: f64,
    /// Lumped lateral mass
    #[serde(default)]
    pub mass: f64,
    /// Lateral DOF restrained (ground)
    #[serde(default)]
    pub fixed: bool,

    /// Equation number, `None` for fixed floors
    #[serde(skip)]
    pub(crate) eq: Option<usize>,
}

impl Floor {
    /// Create a free floor
    pub fn new(x: f64, y: f64, mass: f64) -> Self {
        Self {
            x,
            y,
            mass,
            fixed: false,
            eq: None,
        }
    }

    /// Create a fixed ground point
    pub fn ground(x: f64, y: f64) -> Self {
        Self {
            fixed: true,
            ..Self::new(x, y, 0.0)
        }
    }
}

/// Bilinear hysteretic law with kinematic hardening
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bilinear {
    /// Initial stiffness
    pub k0: f64,
    /// Yield force
    pub fy: f64,
    /// Post-yield to initial stiffness ratio
    pub b: f64,
}

/// Committed or trial state of a [`Bilinear`] law
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct BilinearState {
    pub plastic: f64,
    pub back_force: f64,
    pub force: f64,
    pub tangent: f64,
}

impl Bilinear {
    pub fn new(k0: f64, fy: f64, b: f64) -> Self {
        Self { k0, fy, b }
    }

    fn hardening(&self) -> f64 {
        self.b * self.k0 / (1.0 - self.b)
    }

    /// Return-mapping update from the committed state for deformation `u`
    pub(crate) fn trial(&self, committed: &BilinearState, u: f64) -> BilinearState {
        let trial_force = self.k0 * (u - committed.plastic);
        let xi = trial_force - committed.back_force;
        let f = xi.abs() - self.fy;
        if f <= 0.0 {
            return BilinearState {
                force: trial_force,
                tangent: self.k0,
                ..*committed
            };
        }
        let h = self.hardening();
        let dgamma = f / (self.k0 + h);
        let sign = xi.signum();
        BilinearState {
            plastic: committed.plastic + dgamma * sign,
            back_force: committed.back_force + dgamma * h * sign,
            force: trial_force - dgamma * self.k0 * sign,
            tangent: self.k0 * h / (self.k0 + h),
        }
    }
}

/// Constitutive behaviour of a two-node lateral element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    /// Story shear spring
    Spring(Bilinear),
    /// Infill strut, lateral stiffness contribution only
    Strut { k: f64 },
}

/// Two-node element acting on the lateral DOFs of its end floors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub node_i: NodeTag,
    pub node_j: NodeTag,
    pub kind: ElementKind,

    #[serde(skip)]
    pub(crate) removed: bool,
    #[serde(skip)]
    pub(crate) committed: BilinearState,
    #[serde(skip)]
    pub(crate) trial: BilinearState,
}

impl Element {
    pub fn new(node_i: NodeTag, node_j: NodeTag, kind: ElementKind) -> Self {
        let initial = BilinearState {
            tangent: Self::initial_stiffness_of(&kind),
            ..Default::default()
        };
        Self {
            node_i,
            node_j,
            kind,
            removed: false,
            committed: initial,
            trial: initial,
        }
    }

    /// Bilinear story spring
    pub fn spring(node_i: NodeTag, node_j: NodeTag, k0: f64, fy: f64, b: f64) -> Self {
        Self::new(node_i, node_j, ElementKind::Spring(Bilinear::new(k0, fy, b)))
    }

    /// Linear strut
    pub fn strut(node_i: NodeTag, node_j: NodeTag, k: f64) -> Self {
        Self::new(node_i, node_j, ElementKind::Strut { k })
    }

    fn initial_stiffness_of(kind: &ElementKind) -> f64 {
        match kind {
            ElementKind::Spring(law) => law.k0,
            ElementKind::Strut { k } => *k,
        }
    }

    pub fn initial_stiffness(&self) -> f64 {
        Self::initial_stiffness_of(&self.kind)
    }

    /// Update the trial state for deformation `u = d_j - d_i`
    pub(crate) fn set_trial(&mut self, u: f64) {
        self.trial = match &self.kind {
            ElementKind::Spring(law) => law.trial(&self.committed, u),
            ElementKind::Strut { k } => BilinearState {
                force: k * u,
                tangent: *k,
                ..Default::default()
            },
        };
    }

    pub(crate) fn commit(&mut self) {
        self.committed = self.trial;
    }

    pub(crate) fn revert(&mut self) {
        self.trial = self.committed;
    }

    /// Global end forces: [Fx_i, Fy_i, Mz_i, Fx_j, Fy_j, Mz_j]
    pub(crate) fn global_force(&self) -> Vec<f64> {
        let f = self.committed.force;
        vec![-f, 0.0, 0.0, f, 0.0, 0.0]
    }

    /// Accumulated plastic deformation
    pub(crate) fn plastic_deformation(&self) -> Vec<f64> {
        vec![self.committed.plastic, 0.0, 0.0]
    }
}
