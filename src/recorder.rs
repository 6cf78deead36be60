//! Response recording
//!
//! A [`ResponseRecorder`] owns pre-sized series for every channel requested in
//! a [`RecorderSpec`]. Row 0 holds the state before the first step and row
//! `k + 1` the state after step `k`.

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};
use crate::ground_motion::GroundMotion;
use crate::math;
use crate::removal::PairForces;
use crate::solver::{ElementTag, NodeTag, ResponseQuery, Solver};

/// One row per recorded step
pub type StepRows = Vec<Vec<f64>>;

/// Inter-story drift ratio between two vertically stacked points
pub fn interstory_drift(lower_disp: f64, upper_disp: f64, lower_y: f64, upper_y: f64) -> f64 {
    (upper_disp - lower_disp) / (upper_y - lower_y)
}

/// Node quantities to record for the tracked nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChannels {
    pub displacement: bool,
    pub velocity: bool,
    pub acceleration: bool,
    /// Drift between consecutive tracked nodes
    pub drift: bool,
}

/// A group of elements sharing one response channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementTrack {
    /// Name used in the output (e.g. "columns")
    pub label: String,
    /// Elements to query, in output order
    pub elements: Vec<ElementTag>,
    /// Channel to query
    pub query: ResponseQuery,
}

/// What to record during a procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderSpec {
    /// Tracked nodes, one per floor from the bottom up when drift is wanted
    #[serde(default)]
    pub nodes: Vec<NodeTag>,
    /// DOF read at the tracked nodes
    #[serde(default = "default_dof")]
    pub dof: usize,
    /// Coordinate axis used as "vertical" for drift
    #[serde(default = "default_vertical_axis")]
    pub vertical_axis: usize,
    /// Node channels
    #[serde(default)]
    pub channels: NodeChannels,
    /// Element channels
    #[serde(default)]
    pub element_tracks: Vec<ElementTrack>,
    /// Record the first-mode period after each step
    #[serde(default)]
    pub track_period: bool,
}

fn default_dof() -> usize {
    1
}

fn default_vertical_axis() -> usize {
    2
}

impl Default for RecorderSpec {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            dof: default_dof(),
            vertical_axis: default_vertical_axis(),
            channels: NodeChannels::default(),
            element_tracks: Vec::new(),
            track_period: false,
        }
    }
}

impl RecorderSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track floor nodes (bottom to top) recording displacement and drift
    pub fn with_story_nodes(mut self, nodes: Vec<NodeTag>) -> Self {
        self.nodes = nodes;
        self.channels.displacement = true;
        self.channels.drift = true;
        self
    }

    /// Track nodes without enabling any channel
    pub fn with_nodes(mut self, nodes: Vec<NodeTag>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_displacement(mut self) -> Self {
        self.channels.displacement = true;
        self
    }

    pub fn with_velocity(mut self) -> Self {
        self.channels.velocity = true;
        self
    }

    pub fn with_acceleration(mut self) -> Self {
        self.channels.acceleration = true;
        self
    }

    pub fn with_drift(mut self) -> Self {
        self.channels.drift = true;
        self
    }

    /// Record global forces of a group of elements
    pub fn with_element_forces(self, label: &str, elements: Vec<ElementTag>) -> Self {
        self.with_element_response(label, elements, ResponseQuery::GlobalForce)
    }

    /// Record any element response channel for a group of elements
    pub fn with_element_response(
        mut self,
        label: &str,
        elements: Vec<ElementTag>,
        query: ResponseQuery,
    ) -> Self {
        self.element_tracks.push(ElementTrack {
            label: label.to_string(),
            elements,
            query,
        });
        self
    }

    /// Record the first-mode period after each step
    pub fn with_period(mut self) -> Self {
        self.track_period = true;
        self
    }

    /// All element tags queried by this spec
    pub fn tracked_elements(&self) -> impl Iterator<Item = ElementTag> + '_ {
        self.element_tracks.iter().flat_map(|t| t.elements.iter().copied())
    }
}

/// Recorded response of one element group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSeries {
    /// Group name
    pub label: String,
    /// Channel queried
    pub query: ResponseQuery,
    /// Elements, in the same order as `values`
    pub elements: Vec<ElementTag>,
    /// Per element, one row per step
    pub values: Vec<StepRows>,
}

/// Forces of both members of a strut pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSeries {
    pub element_a: ElementTag,
    pub element_b: ElementTag,
    pub force_a: StepRows,
    pub force_b: StepRows,
}

/// All recorded series of one procedure run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseSeries {
    /// Control displacement (or pseudo-time for transient runs)
    pub control: Vec<f64>,
    /// Solver pseudo-time: load factor or time
    pub pseudo_time: Vec<f64>,
    /// Tracked nodes, column order of the node series
    pub nodes: Vec<NodeTag>,
    pub displacement: Option<StepRows>,
    pub velocity: Option<StepRows>,
    pub acceleration: Option<StepRows>,
    /// One column per story (consecutive tracked node pair)
    pub drift: Option<StepRows>,
    pub elements: Vec<TrackSeries>,
    pub strut_forces: Vec<PairSeries>,
    /// First-mode period per step
    pub periods: Option<Vec<f64>>,
}

impl ResponseSeries {
    /// Number of recorded rows
    pub fn len(&self) -> usize {
        self.control.len()
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty()
    }

    /// Drop every row from `len` on
    pub fn truncate(&mut self, len: usize) {
        self.control.truncate(len);
        self.pseudo_time.truncate(len);
        for rows in [
            &mut self.displacement,
            &mut self.velocity,
            &mut self.acceleration,
            &mut self.drift,
        ]
        .into_iter()
        .flatten()
        {
            rows.truncate(len);
        }
        for track in &mut self.elements {
            for rows in &mut track.values {
                rows.truncate(len);
            }
        }
        for pair in &mut self.strut_forces {
            pair.force_a.truncate(len);
            pair.force_b.truncate(len);
        }
        if let Some(periods) = &mut self.periods {
            periods.truncate(len);
        }
    }

    /// Per-story mean drift over rows `from..`
    pub fn residual_drift(&self, from: usize) -> Option<Vec<f64>> {
        let drift = self.drift.as_ref()?;
        let tail = drift.get(from..)?;
        if tail.is_empty() {
            return None;
        }
        let stories = tail[0].len();
        Some(
            (0..stories)
                .map(|s| {
                    let column: Vec<f64> = tail.iter().map(|row| row[s]).collect();
                    math::mean(&column).unwrap_or(0.0)
                })
                .collect(),
        )
    }

    /// Relative acceleration plus the scaled ground acceleration at each row
    pub fn absolute_acceleration(&self, motion: &GroundMotion) -> Option<StepRows> {
        let relative = self.acceleration.as_ref()?;
        Some(
            relative
                .iter()
                .zip(&self.pseudo_time)
                .map(|(row, &t)| {
                    let ag = motion.acceleration_at(t);
                    row.iter().map(|a| a + ag).collect()
                })
                .collect(),
        )
    }

    /// Recorded series of an element group by label
    pub fn track(&self, label: &str) -> Option<&TrackSeries> {
        self.elements.iter().find(|t| t.label == label)
    }
}

/// Fills a [`ResponseSeries`] step by step
#[derive(Debug)]
pub struct ResponseRecorder {
    spec: RecorderSpec,
    heights: Vec<f64>,
    series: ResponseSeries,
}

impl ResponseRecorder {
    /// Validate the recorder spec against the model and pre-size every series
    pub fn new<S: Solver + ?Sized>(
        spec: RecorderSpec,
        solver: &S,
        total_steps: usize,
    ) -> DriverResult<Self> {
        let rows = total_steps + 1;
        let n_nodes = spec.nodes.len();

        if spec.channels.drift && n_nodes < 2 {
            return Err(DriverError::InvalidTracking(format!(
                "drift needs at least 2 tracked nodes, got {}",
                n_nodes
            )));
        }
        let any_node_channel = spec.channels.displacement
            || spec.channels.velocity
            || spec.channels.acceleration
            || spec.channels.drift;
        if any_node_channel && n_nodes == 0 {
            return Err(DriverError::InvalidTracking(
                "node channels requested without tracked nodes".to_string(),
            ));
        }

        let mut heights = Vec::new();
        if spec.channels.drift {
            for &node in &spec.nodes {
                heights.push(
                    solver
                        .node_coordinate(node, spec.vertical_axis)
                        .map_err(DriverError::from_query)?,
                );
            }
            for (i, pair) in heights.windows(2).enumerate() {
                if (pair[1] - pair[0]).abs() < 1e-12 {
                    return Err(DriverError::InvalidTracking(format!(
                        "tracked nodes {} and {} have no vertical separation",
                        spec.nodes[i],
                        spec.nodes[i + 1]
                    )));
                }
            }
        }

        let node_rows = |enabled: bool, width: usize| enabled.then(|| vec![vec![0.0; width]; rows]);
        let series = ResponseSeries {
            control: vec![0.0; rows],
            pseudo_time: vec![0.0; rows],
            nodes: spec.nodes.clone(),
            displacement: node_rows(spec.channels.displacement, n_nodes),
            velocity: node_rows(spec.channels.velocity, n_nodes),
            acceleration: node_rows(spec.channels.acceleration, n_nodes),
            drift: node_rows(spec.channels.drift, n_nodes.saturating_sub(1)),
            elements: spec
                .element_tracks
                .iter()
                .map(|track| TrackSeries {
                    label: track.label.clone(),
                    query: track.query.clone(),
                    elements: track.elements.clone(),
                    values: vec![vec![Vec::new(); rows]; track.elements.len()],
                })
                .collect(),
            strut_forces: Vec::new(),
            periods: spec.track_period.then(|| vec![0.0; rows]),
        };

        Ok(Self {
            spec,
            heights,
            series,
        })
    }

    /// Number of pre-allocated rows
    pub fn capacity(&self) -> usize {
        self.series.control.len()
    }

    /// Query every requested channel into row `row`
    pub fn record<S: Solver + ?Sized>(
        &mut self,
        solver: &mut S,
        row: usize,
        control: f64,
    ) -> DriverResult<()> {
        if row >= self.capacity() {
            return Err(DriverError::PreconditionViolation(format!(
                "row {} outside pre-sized series of {} rows",
                row,
                self.capacity()
            )));
        }
        self.series.control[row] = control;
        self.series.pseudo_time[row] = solver.current_time();

        let dof = self.spec.dof;
        let channels = self.spec.channels;
        let mut displacements = Vec::with_capacity(self.spec.nodes.len());
        for (i, &node) in self.spec.nodes.iter().enumerate() {
            if channels.displacement || channels.drift {
                let d = solver
                    .node_displacement(node, dof)
                    .map_err(DriverError::from_query)?;
                displacements.push(d);
                if let Some(rows) = &mut self.series.displacement {
                    rows[row][i] = d;
                }
            }
            if let Some(rows) = &mut self.series.velocity {
                rows[row][i] = solver.node_velocity(node, dof).map_err(DriverError::from_query)?;
            }
            if let Some(rows) = &mut self.series.acceleration {
                rows[row][i] = solver
                    .node_acceleration(node, dof)
                    .map_err(DriverError::from_query)?;
            }
        }

        if let Some(rows) = &mut self.series.drift {
            for s in 0..displacements.len().saturating_sub(1) {
                rows[row][s] = interstory_drift(
                    displacements[s],
                    displacements[s + 1],
                    self.heights[s],
                    self.heights[s + 1],
                );
            }
        }

        for (track, out) in self.spec.element_tracks.iter().zip(&mut self.series.elements) {
            for (e, &element) in track.elements.iter().enumerate() {
                let values = match track.query {
                    ResponseQuery::GlobalForce => solver.element_force(element),
                    ref query => solver.element_response(element, query),
                }
                .map_err(DriverError::from_query)?;
                out.values[e][row] = values;
            }
        }

        if let Some(periods) = &mut self.series.periods {
            let eig = solver.eigenvalues(1).map_err(DriverError::from_query)?;
            periods[row] = eig
                .first()
                .copied()
                .and_then(math::period_from_eigenvalue)
                .unwrap_or(f64::NAN);
        }

        Ok(())
    }

    /// Store strut pair forces for row `row`
    pub fn record_pairs(&mut self, row: usize, forces: &[PairForces]) {
        if self.series.strut_forces.is_empty() && !forces.is_empty() {
            let rows = self.capacity();
            self.series.strut_forces = forces
                .iter()
                .map(|f| PairSeries {
                    element_a: f.element_a,
                    element_b: f.element_b,
                    force_a: vec![Vec::new(); rows],
                    force_b: vec![Vec::new(); rows],
                })
                .collect();
        }
        for (pair, f) in self.series.strut_forces.iter_mut().zip(forces) {
            if let (Some(a), Some(b)) = (pair.force_a.get_mut(row), pair.force_b.get_mut(row)) {
                *a = f.force_a.clone();
                *b = f.force_b.clone();
            }
        }
    }

    pub fn series(&self) -> &ResponseSeries {
        &self.series
    }

    /// Hand over the series, keeping the first `len` rows
    pub fn finish(mut self, len: usize) -> ResponseSeries {
        self.series.truncate(len);
        self.series
    }
}
