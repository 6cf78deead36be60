//! In-process reference solver: a lumped-mass shear building
//!
//! Each floor carries one lateral DOF and a lumped mass. Floors are connected
//! by bilinear story springs and, optionally, linear infill struts. The
//! backend implements the full [`Solver`] facade (load and displacement
//! control, Newmark integration with Rayleigh damping, uniform base excitation,
//! eigenvalues and element removal), which is enough to exercise every
//! procedure end to end without an external finite element program.

mod element;
mod iteration;

pub use element::{Bilinear, Element, ElementKind, Floor};

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::analysis::config::{
    Algorithm, AnalysisKind, ConstraintHandler, ConvergenceTest, Integrator, Numberer,
    SystemSolver,
};
use crate::damping::RayleighDamping;
use crate::error::{SolverError, SolverResult};
use crate::ground_motion::GroundMotion;
use crate::math::{self, Mat, Vec};
use crate::solver::{Convergence, ElementTag, NodeTag, ResponseQuery, Solver};

/// Serializable description of a shear building
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildingSpec {
    pub floors: std::vec::Vec<Tagged<Floor>>,
    pub elements: std::vec::Vec<Tagged<Element>>,
    /// Reference lateral load pattern
    #[serde(default)]
    pub lateral_loads: std::vec::Vec<NodeLoad>,
}

/// Model entity with its tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tagged<T> {
    pub tag: usize,
    #[serde(flatten)]
    pub item: T,
}

/// Lateral force at a floor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    pub node: NodeTag,
    pub value: f64,
}

/// Analysis objects currently defined on the backend
#[derive(Debug, Clone, Default)]
pub(crate) struct Setup {
    pub constraints: Option<ConstraintHandler>,
    pub numberer: Option<Numberer>,
    pub system: Option<SystemSolver>,
    pub test: Option<ConvergenceTest>,
    pub algorithm: Option<Algorithm>,
    pub integrator: Option<Integrator>,
    pub kind: Option<AnalysisKind>,
}

/// Committed response state
#[derive(Debug, Clone)]
pub(crate) struct State {
    pub disp: Vec,
    pub vel: Vec,
    pub acc: Vec,
    pub load_factor: f64,
    pub time: f64,
}

impl State {
    fn zeros(n: usize) -> Self {
        Self {
            disp: Vec::zeros(n),
            vel: Vec::zeros(n),
            acc: Vec::zeros(n),
            load_factor: 0.0,
            time: 0.0,
        }
    }
}

/// Lumped-mass shear building implementing [`Solver`]
#[derive(Debug, Clone)]
pub struct ShearBuilding {
    floors: BTreeMap<NodeTag, Floor>,
    elements: BTreeMap<ElementTag, Element>,
    /// Reference lateral load pattern, scaled by the load factor
    pattern: BTreeMap<NodeTag, f64>,
    /// Loads held constant from earlier stages
    held: Vec,
    n_eq: usize,
    pub(crate) setup: Setup,
    pub(crate) state: State,
    rayleigh: Option<RayleighDamping>,
    ground: Option<GroundMotion>,
}

impl Default for ShearBuilding {
    fn default() -> Self {
        Self::new()
    }
}

impl ShearBuilding {
    /// Create an empty model
    pub fn new() -> Self {
        Self {
            floors: BTreeMap::new(),
            elements: BTreeMap::new(),
            pattern: BTreeMap::new(),
            held: Vec::zeros(0),
            n_eq: 0,
            setup: Setup::default(),
            state: State::zeros(0),
            rayleigh: None,
            ground: None,
        }
    }

    /// Regular building: ground node 0 and floors `1..=stories` stacked at
    /// `story_height`, story `i` spring tagged `i`
    pub fn uniform(
        stories: usize,
        story_height: f64,
        mass: f64,
        spring: Bilinear,
    ) -> SolverResult<Self> {
        let mut model = Self::new();
        model.add_floor(0, Floor::ground(0.0, 0.0))?;
        for i in 1..=stories {
            model.add_floor(i, Floor::new(0.0, i as f64 * story_height, mass))?;
            model.add_element(i, Element::new(i - 1, i, ElementKind::Spring(spring)))?;
        }
        Ok(model)
    }

    /// Build a model from its serializable description
    pub fn from_spec(spec: &BuildingSpec) -> SolverResult<Self> {
        let mut model = Self::new();
        for floor in &spec.floors {
            model.add_floor(floor.tag, floor.item.clone())?;
        }
        for element in &spec.elements {
            model.add_element(
                element.tag,
                Element::new(element.item.node_i, element.item.node_j, element.item.kind),
            )?;
        }
        for load in &spec.lateral_loads {
            model.add_lateral_load(load.node, load.value)?;
        }
        Ok(model)
    }

    /// Add a floor
    pub fn add_floor(&mut self, tag: NodeTag, floor: Floor) -> SolverResult<()> {
        if self.floors.contains_key(&tag) {
            return Err(SolverError::DuplicateTag(tag));
        }
        if !floor.fixed && !(floor.mass >= 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "floor {} has negative mass {}",
                tag, floor.mass
            )));
        }
        self.floors.insert(tag, floor);
        self.renumber();
        Ok(())
    }

    /// Add a two-node element between existing floors
    pub fn add_element(&mut self, tag: ElementTag, element: Element) -> SolverResult<()> {
        for node in [element.node_i, element.node_j] {
            if !self.floors.contains_key(&node) {
                return Err(SolverError::NodeNotFound(node));
            }
        }
        if element.node_i == element.node_j {
            return Err(SolverError::InvalidInput(format!(
                "element {} connects node {} to itself",
                tag, element.node_i
            )));
        }
        if self.elements.contains_key(&tag) {
            return Err(SolverError::DuplicateTag(tag));
        }
        self.elements.insert(tag, element);
        Ok(())
    }

    /// Add a lateral force to the reference pattern
    pub fn add_lateral_load(&mut self, node: NodeTag, value: f64) -> SolverResult<()> {
        if !self.floors.contains_key(&node) {
            return Err(SolverError::NodeNotFound(node));
        }
        *self.pattern.entry(node).or_insert(0.0) += value;
        Ok(())
    }

    /// Replace the reference pattern with forces proportional to mass × height
    pub fn set_triangular_pattern(&mut self) {
        let weights: std::vec::Vec<(NodeTag, f64)> = self
            .floors
            .iter()
            .filter(|(_, f)| !f.fixed)
            .map(|(&tag, f)| (tag, f.mass * f.y))
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        self.pattern.clear();
        if total > 0.0 {
            for (tag, w) in weights {
                self.pattern.insert(tag, w / total);
            }
        }
    }

    /// Hold the currently applied loads constant and restart the load factor
    /// at zero with an empty pattern
    pub fn hold_loads(&mut self) {
        self.held = self.applied_static_load();
        self.pattern.clear();
        self.state.load_factor = 0.0;
    }

    /// Total mass of the free floors
    pub fn total_mass(&self) -> f64 {
        self.floors.values().filter(|f| !f.fixed).map(|f| f.mass).sum()
    }

    /// Number of equations
    pub fn num_equations(&self) -> usize {
        self.n_eq
    }

    /// Active convergence test
    pub fn active_test(&self) -> Option<&ConvergenceTest> {
        self.setup.test.as_ref()
    }

    /// Active iteration algorithm
    pub fn active_algorithm(&self) -> Option<&Algorithm> {
        self.setup.algorithm.as_ref()
    }

    /// Whether an element has been removed
    pub fn is_removed(&self, element: ElementTag) -> bool {
        self.elements.get(&element).is_some_and(|e| e.removed)
    }

    fn renumber(&mut self) {
        let mut eq = 0;
        for floor in self.floors.values_mut() {
            if floor.fixed {
                floor.eq = None;
            } else {
                floor.eq = Some(eq);
                eq += 1;
            }
        }
        self.n_eq = eq;
        self.held = Vec::zeros(eq);
        self.state = State::zeros(eq);
    }

    fn floor(&self, node: NodeTag) -> SolverResult<&Floor> {
        self.floors.get(&node).ok_or(SolverError::NodeNotFound(node))
    }

    fn element(&self, tag: ElementTag) -> SolverResult<&Element> {
        let element = self
            .elements
            .get(&tag)
            .ok_or(SolverError::ElementNotFound(tag))?;
        if element.removed {
            return Err(SolverError::ElementRemoved(tag));
        }
        Ok(element)
    }

    fn eq_of(&self, node: NodeTag) -> Option<usize> {
        self.floors.get(&node).and_then(|f| f.eq)
    }

    fn lateral(&self, values: &Vec, node: NodeTag) -> f64 {
        self.eq_of(node).map_or(0.0, |eq| values[eq])
    }

    fn nodal_value(&self, values: &Vec, node: NodeTag, dof: usize) -> SolverResult<f64> {
        self.floor(node)?;
        match dof {
            1 => Ok(self.lateral(values, node)),
            2 | 3 => Ok(0.0),
            _ => Err(SolverError::InvalidInput(format!(
                "DOF {} does not exist on a planar shear building",
                dof
            ))),
        }
    }

    pub(crate) fn masses(&self) -> std::vec::Vec<f64> {
        self.floors
            .values()
            .filter(|f| f.eq.is_some())
            .map(|f| f.mass)
            .collect()
    }

    pub(crate) fn reference_load(&self) -> Vec {
        let mut p = Vec::zeros(self.n_eq);
        for (&node, &value) in &self.pattern {
            if let Some(eq) = self.eq_of(node) {
                p[eq] += value;
            }
        }
        p
    }

    pub(crate) fn applied_static_load(&self) -> Vec {
        &self.held + self.reference_load() * self.state.load_factor
    }

    /// Set element trial states for the displacement vector `u`
    pub(crate) fn update_trial(&mut self, u: &Vec) {
        let eqs: std::vec::Vec<(Option<usize>, Option<usize>)> = self
            .elements
            .values()
            .map(|e| (self.eq_of(e.node_i), self.eq_of(e.node_j)))
            .collect();
        for (element, (ei, ej)) in self.elements.values_mut().zip(eqs) {
            if element.removed {
                continue;
            }
            let d_i = ei.map_or(0.0, |eq| u[eq]);
            let d_j = ej.map_or(0.0, |eq| u[eq]);
            element.set_trial(d_j - d_i);
        }
    }

    pub(crate) fn commit_elements(&mut self) {
        for element in self.elements.values_mut() {
            element.commit();
        }
    }

    pub(crate) fn revert_elements(&mut self) {
        for element in self.elements.values_mut() {
            element.revert();
        }
    }

    /// Stiffness matrix (initial or trial tangent) and resisting force vector
    pub(crate) fn assemble(&self, initial: bool) -> (Mat, Vec) {
        let n = self.n_eq;
        let mut k = Mat::zeros(n, n);
        let mut r = Vec::zeros(n);
        for element in self.elements.values().filter(|e| !e.removed) {
            let ke = if initial {
                element.initial_stiffness()
            } else {
                element.trial.tangent
            };
            let f = element.trial.force;
            let ei = self.eq_of(element.node_i);
            let ej = self.eq_of(element.node_j);
            if let Some(i) = ei {
                k[(i, i)] += ke;
                r[i] -= f;
            }
            if let Some(j) = ej {
                k[(j, j)] += ke;
                r[j] += f;
            }
            if let (Some(i), Some(j)) = (ei, ej) {
                k[(i, j)] -= ke;
                k[(j, i)] -= ke;
            }
        }
        (k, r)
    }

    pub(crate) fn rayleigh(&self) -> Option<&RayleighDamping> {
        self.rayleigh.as_ref()
    }

    /// Base acceleration at time `t`
    pub(crate) fn ground_acceleration(&self, t: f64) -> f64 {
        self.ground.as_ref().map_or(0.0, |g| g.acceleration_at(t))
    }

    pub(crate) fn control_equation(&self, node: NodeTag, dof: usize) -> SolverResult<usize> {
        self.floor(node)?;
        if dof != 1 {
            return Err(SolverError::Unsupported(format!(
                "displacement control on DOF {}",
                dof
            )));
        }
        self.eq_of(node).ok_or_else(|| {
            SolverError::InvalidInput(format!("control node {} is restrained", node))
        })
    }
}

impl Solver for ShearBuilding {
    fn reset_analysis(&mut self) {
        self.setup = Setup::default();
    }

    fn set_constraints(&mut self, handler: ConstraintHandler) -> SolverResult<()> {
        self.setup.constraints = Some(handler);
        Ok(())
    }

    fn set_numberer(&mut self, numberer: Numberer) -> SolverResult<()> {
        self.setup.numberer = Some(numberer);
        Ok(())
    }

    fn set_system(&mut self, system: SystemSolver) -> SolverResult<()> {
        self.setup.system = Some(system);
        Ok(())
    }

    fn set_test(&mut self, test: &ConvergenceTest) -> SolverResult<()> {
        if !(test.tolerance > 0.0) || test.max_iterations == 0 {
            return Err(SolverError::InvalidInput(format!(
                "convergence test needs a positive tolerance and iteration limit, got {:?}",
                test
            )));
        }
        self.setup.test = Some(*test);
        Ok(())
    }

    fn set_algorithm(&mut self, algorithm: &Algorithm) -> SolverResult<()> {
        self.setup.algorithm = Some(*algorithm);
        Ok(())
    }

    fn set_integrator(&mut self, integrator: &Integrator) -> SolverResult<()> {
        match *integrator {
            Integrator::DisplacementControl { node, dof, .. } => {
                self.control_equation(node, dof)?;
            }
            Integrator::Newmark { gamma, beta } => {
                if !(beta > 0.0 && gamma > 0.0) {
                    return Err(SolverError::InvalidInput(format!(
                        "Newmark parameters must be positive, got gamma={} beta={}",
                        gamma, beta
                    )));
                }
            }
            Integrator::LoadControl { .. } => {}
        }
        self.setup.integrator = Some(*integrator);
        Ok(())
    }

    fn set_analysis(&mut self, kind: AnalysisKind) -> SolverResult<()> {
        self.setup.kind = Some(kind);
        Ok(())
    }

    fn analyze(&mut self, steps: usize, dt: Option<f64>) -> SolverResult<Convergence> {
        let test = self
            .setup
            .test
            .ok_or_else(|| SolverError::AnalysisFailed("no convergence test defined".into()))?;
        let algorithm = self.setup.algorithm.unwrap_or_default();
        let integrator = self
            .setup
            .integrator
            .ok_or_else(|| SolverError::AnalysisFailed("no integrator defined".into()))?;
        let kind = self
            .setup
            .kind
            .ok_or_else(|| SolverError::AnalysisFailed("no analysis type defined".into()))?;

        for step in 0..steps {
            let result = match (kind, integrator) {
                (AnalysisKind::Static, Integrator::LoadControl { increment }) => {
                    iteration::load_control(self, &test, &algorithm, increment)
                }
                (AnalysisKind::Static, Integrator::DisplacementControl { node, dof, increment }) => {
                    let eq = self.control_equation(node, dof)?;
                    iteration::displacement_control(self, &test, &algorithm, eq, increment)
                }
                (AnalysisKind::Transient, Integrator::Newmark { gamma, beta }) => {
                    let dt = dt.filter(|dt| *dt > 0.0).ok_or_else(|| {
                        SolverError::InvalidInput("transient step needs a positive dt".into())
                    })?;
                    iteration::newmark(self, &test, &algorithm, gamma, beta, dt)
                }
                (kind, integrator) => {
                    return Err(SolverError::Unsupported(format!(
                        "{:?} analysis with {:?}",
                        kind, integrator
                    )))
                }
            };
            // Trial states are left dirty on both failure paths
            let converged = match result {
                Ok(converged) => converged,
                Err(e) => {
                    self.revert_elements();
                    return Err(e);
                }
            };
            if !converged {
                debug!("Step {} of {} did not converge with {:?}", step + 1, steps, algorithm);
                self.revert_elements();
                return Ok(Convergence::NotConverged);
            }
        }
        Ok(Convergence::Converged)
    }

    fn current_time(&self) -> f64 {
        match self.setup.kind {
            Some(AnalysisKind::Transient) => self.state.time,
            _ => self.state.load_factor,
        }
    }

    fn node_displacement(&self, node: NodeTag, dof: usize) -> SolverResult<f64> {
        self.nodal_value(&self.state.disp, node, dof)
    }

    fn node_velocity(&self, node: NodeTag, dof: usize) -> SolverResult<f64> {
        self.nodal_value(&self.state.vel, node, dof)
    }

    fn node_acceleration(&self, node: NodeTag, dof: usize) -> SolverResult<f64> {
        self.nodal_value(&self.state.acc, node, dof)
    }

    fn node_coordinate(&self, node: NodeTag, axis: usize) -> SolverResult<f64> {
        let floor = self.floor(node)?;
        match axis {
            1 => Ok(floor.x),
            2 => Ok(floor.y),
            3 => Ok(0.0),
            _ => Err(SolverError::InvalidInput(format!("axis {} does not exist", axis))),
        }
    }

    fn element_nodes(&self, element: ElementTag) -> SolverResult<(NodeTag, NodeTag)> {
        let e = self.element(element)?;
        Ok((e.node_i, e.node_j))
    }

    fn element_force(&self, element: ElementTag) -> SolverResult<std::vec::Vec<f64>> {
        Ok(self.element(element)?.global_force())
    }

    fn element_response(
        &self,
        element: ElementTag,
        query: &ResponseQuery,
    ) -> SolverResult<std::vec::Vec<f64>> {
        let e = self.element(element)?;
        match query {
            ResponseQuery::GlobalForce => Ok(e.global_force()),
            ResponseQuery::PlasticDeformation => Ok(e.plastic_deformation()),
            ResponseQuery::SectionFiber { .. } => Err(SolverError::Unsupported(
                "shear-building elements have no fiber sections".into(),
            )),
            ResponseQuery::Named(args) => {
                let name = args.first().map(|s| s.to_ascii_lowercase());
                match name.as_deref() {
                    Some("force") | Some("globalforce") => Ok(e.global_force()),
                    Some("deformation") => Ok(vec![
                        self.lateral(&self.state.disp, e.node_j)
                            - self.lateral(&self.state.disp, e.node_i),
                    ]),
                    Some("plasticdeformation") => Ok(e.plastic_deformation()),
                    _ => Err(SolverError::Unsupported(format!("response {:?}", args))),
                }
            }
        }
    }

    fn eigenvalues(&mut self, modes: usize) -> SolverResult<std::vec::Vec<f64>> {
        if modes == 0 || modes > self.n_eq {
            return Err(SolverError::InvalidInput(format!(
                "{} modes requested from a model with {} equations",
                modes, self.n_eq
            )));
        }
        let (k, _) = self.assemble(false);
        let values = math::generalized_eigenvalues(&k, &self.masses()).ok_or_else(|| {
            SolverError::AnalysisFailed("eigenvalue analysis needs positive floor masses".into())
        })?;
        Ok(values.into_iter().take(modes).collect())
    }

    fn remove_element(&mut self, element: ElementTag) -> SolverResult<()> {
        let e = self
            .elements
            .get_mut(&element)
            .ok_or(SolverError::ElementNotFound(element))?;
        if e.removed {
            return Err(SolverError::ElementRemoved(element));
        }
        e.removed = true;
        debug!("Element {} removed", element);
        Ok(())
    }

    fn define_ground_motion(&mut self, motion: &GroundMotion, dof: usize) -> SolverResult<()> {
        if dof != 1 {
            return Err(SolverError::Unsupported(format!(
                "base excitation along DOF {}",
                dof
            )));
        }
        self.ground = Some(motion.clone());
        self.state.time = 0.0;
        Ok(())
    }

    fn set_rayleigh_damping(&mut self, damping: &RayleighDamping) -> SolverResult<()> {
        self.rayleigh = Some(*damping);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_story() -> ShearBuilding {
        ShearBuilding::uniform(2, 3.0, 1.0, Bilinear::new(100.0, 1e9, 0.0)).unwrap()
    }

    #[test]
    fn test_uniform_model_numbering() {
        let model = two_story();
        assert_eq!(model.num_equations(), 2);
        assert_eq!(model.node_coordinate(2, 2).unwrap(), 6.0);
        assert_eq!(model.element_nodes(2).unwrap(), (1, 2));
        assert!(matches!(
            model.node_displacement(9, 1),
            Err(SolverError::NodeNotFound(9))
        ));
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let mut model = two_story();
        assert_eq!(
            model.add_floor(1, Floor::new(0.0, 9.0, 1.0)),
            Err(SolverError::DuplicateTag(1))
        );
        assert_eq!(
            model.add_element(3, Element::strut(0, 7, 1.0)),
            Err(SolverError::NodeNotFound(7))
        );
    }

    #[test]
    fn test_eigenvalues_of_two_story_building() {
        let mut model = two_story();
        let eig = model.eigenvalues(2).unwrap();
        assert_relative_eq!(eig[0], 100.0 * (3.0 - 5f64.sqrt()) / 2.0, epsilon = 1e-9);
        assert_relative_eq!(eig[1], 100.0 * (3.0 + 5f64.sqrt()) / 2.0, epsilon = 1e-9);
        assert!(model.eigenvalues(3).is_err());
    }

    #[test]
    fn test_removed_element_cannot_be_queried() {
        let mut model = two_story();
        model.remove_element(2).unwrap();
        assert_eq!(model.element_force(2), Err(SolverError::ElementRemoved(2)));
        assert_eq!(model.remove_element(2), Err(SolverError::ElementRemoved(2)));
        assert!(model.is_removed(2));
    }

    #[test]
    fn test_triangular_pattern_sums_to_one() {
        let mut model = two_story();
        model.set_triangular_pattern();
        let p = model.reference_load();
        assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 2.0 * p[0], epsilon = 1e-12);
    }

    #[test]
    fn test_spec_json_roundtrip() {
        let json = r#"{
            "floors": [
                {"tag": 0, "x": 0.0, "y": 0.0, "fixed": true},
                {"tag": 1, "x": 0.0, "y": 3.0, "mass": 2.0}
            ],
            "elements": [
                {"tag": 1, "node_i": 0, "node_j": 1,
                 "kind": {"Spring": {"k0": 100.0, "fy": 5.0, "b": 0.02}}}
            ],
            "lateral_loads": [{"node": 1, "value": 1.0}]
        }"#;
        let spec: BuildingSpec = serde_json::from_str(json).unwrap();
        let model = ShearBuilding::from_spec(&spec).unwrap();
        assert_eq!(model.num_equations(), 1);
        assert_relative_eq!(model.total_mass(), 2.0);
    }
}
