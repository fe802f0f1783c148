//! Random graph walk assessor
//!
//! Entities, their sources and their extraction types form one graph. Node
//! indices are assigned to entities first, then sources (in order of first
//! appearance), then extraction types. Edges connect an entity with each of
//! its sources and extraction types, in both directions.
//!
//! The transition matrix is row-stochastic:
//! - an entity row spreads half its weight evenly over its sources and half
//!   over its extraction types (all of it when only one relation exists)
//! - a source row spreads its weight evenly over the entities it hosts
//! - an extraction type row spreads its weight evenly over the entities it
//!   produced for the concept
//!
//! Isolated nodes keep an empty row.
//!
//! Scores follow `v(t+1) = µ·v0 + (1 - µ)·M·v(t)` for a fixed number of
//! steps, where `v0` pins seed entities to their label and starts every other
//! node at 0.5.

use eta_core::{
    Concept, ConceptId, Entity, EntityId, ExtractionStore, ExtractionType, GraphWalkConfig,
    Result, SourceId,
};
use ndarray::{Array1, Array2};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::metrics::ClassificationCounts;
use crate::sampling::{self, WalkSplit};

/// Start probability of nodes whose label is unknown
pub const UNKNOWN_PRIOR: f64 = 0.5;

// ============================================================================
// Transition Matrix
// ============================================================================

/// Sparse square matrix stored as rows of `(column, weight)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionMatrix {
    rows: Vec<Vec<(usize, f64)>>,
}

impl TransitionMatrix {
    /// Empty matrix with `size` rows
    pub fn new(size: usize) -> Self {
        Self {
            rows: vec![Vec::new(); size],
        }
    }

    /// Build from a dense matrix, keeping non-zero entries
    pub fn from_dense(dense: &Array2<f64>) -> Self {
        let rows = dense
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, w)| **w != 0.0)
                    .map(|(j, w)| (j, *w))
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let n = self.len();
        let mut dense = Array2::zeros((n, n));
        for (i, row) in self.rows.iter().enumerate() {
            for (j, w) in row {
                dense[[i, *j]] += w;
            }
        }
        dense
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &[(usize, f64)] {
        &self.rows[index]
    }

    pub fn row_sum(&self, index: usize) -> f64 {
        self.rows[index].iter().map(|(_, w)| w).sum()
    }

    /// Spread `weight` evenly over `columns`
    fn set_uniform(&mut self, row: usize, columns: &[usize], weight: f64) {
        if columns.is_empty() {
            return;
        }
        let each = weight / columns.len() as f64;
        self.rows[row].extend(columns.iter().map(|c| (*c, each)));
    }

    /// Matrix-vector product `M·v`
    pub fn operate(&self, vector: &Array1<f64>) -> Array1<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|(j, w)| w * vector[*j]).sum())
            .collect()
    }
}

// ============================================================================
// Graph Construction
// ============================================================================

/// Node indices of one concept graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLayout {
    pub entities: Vec<EntityId>,
    pub sources: Vec<SourceId>,
    pub extraction_types: Vec<ExtractionType>,
    source_index: HashMap<SourceId, usize>,
    type_index: HashMap<ExtractionType, usize>,
}

impl NodeLayout {
    pub fn from_entities(entities: &[Entity]) -> Self {
        let mut layout = Self {
            entities: entities.iter().map(|e| e.id).collect(),
            ..Self::default()
        };

        for entity in entities {
            for source in &entity.sources {
                if !layout.source_index.contains_key(source) {
                    layout.source_index.insert(*source, layout.sources.len());
                    layout.sources.push(*source);
                }
            }
        }
        for entity in entities {
            for extraction_type in &entity.extraction_types {
                if !layout.type_index.contains_key(extraction_type) {
                    layout.type_index.insert(*extraction_type, layout.extraction_types.len());
                    layout.extraction_types.push(*extraction_type);
                }
            }
        }
        layout
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.sources.len() + self.extraction_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_node(&self, source: SourceId) -> Option<usize> {
        self.source_index.get(&source).map(|i| self.entities.len() + i)
    }

    pub fn type_node(&self, extraction_type: ExtractionType) -> Option<usize> {
        self.type_index
            .get(&extraction_type)
            .map(|i| self.entities.len() + self.sources.len() + i)
    }
}

/// Graph of one concept ready for walking
#[derive(Debug, Clone)]
pub struct WalkGraph {
    pub layout: NodeLayout,
    pub matrix: TransitionMatrix,
}

/// Build the transition matrix of a concept
///
/// Entity rows give sources and extraction types half the weight each, not
/// one equal share per neighbor.
///
/// `source_neighbors` and `type_neighbors` hold the entity indices adjacent
/// to each source and extraction type. Missing or empty lists fall back to
/// the adjacency recorded on the entities themselves.
pub fn build_transition_matrix(
    entities: &[Entity],
    source_neighbors: &HashMap<SourceId, Vec<usize>>,
    type_neighbors: &HashMap<ExtractionType, Vec<usize>>,
) -> WalkGraph {
    let layout = NodeLayout::from_entities(entities);
    let mut matrix = TransitionMatrix::new(layout.len());

    let mut hosted: HashMap<SourceId, Vec<usize>> = HashMap::new();
    let mut produced: HashMap<ExtractionType, Vec<usize>> = HashMap::new();

    for (index, entity) in entities.iter().enumerate() {
        let sources: Vec<usize> = entity
            .sources
            .iter()
            .filter_map(|s| layout.source_node(*s))
            .collect();
        let types: Vec<usize> = entity
            .extraction_types
            .iter()
            .filter_map(|t| layout.type_node(*t))
            .collect();

        let source_weight = match (sources.is_empty(), types.is_empty()) {
            (false, false) => 0.5,
            (false, true) => 1.0,
            _ => 0.0,
        };
        matrix.set_uniform(index, &sources, source_weight);
        matrix.set_uniform(index, &types, 1.0 - source_weight);

        for source in &entity.sources {
            hosted.entry(*source).or_default().push(index);
        }
        for extraction_type in &entity.extraction_types {
            produced.entry(*extraction_type).or_default().push(index);
        }
    }

    for source in &layout.sources {
        let Some(node) = layout.source_node(*source) else {
            continue;
        };
        let neighbors = match source_neighbors.get(source) {
            Some(list) if !list.is_empty() => list.as_slice(),
            _ => hosted.get(source).map(Vec::as_slice).unwrap_or_default(),
        };
        matrix.set_uniform(node, neighbors, 1.0);
    }

    for extraction_type in &layout.extraction_types {
        let Some(node) = layout.type_node(*extraction_type) else {
            continue;
        };
        let neighbors = match type_neighbors.get(extraction_type) {
            Some(list) if !list.is_empty() => list.as_slice(),
            _ => produced.get(extraction_type).map(Vec::as_slice).unwrap_or_default(),
        };
        matrix.set_uniform(node, neighbors, 1.0);
    }

    WalkGraph { layout, matrix }
}

// ============================================================================
// Propagation
// ============================================================================

/// Start vector: seeds pinned to their label, everything else unknown
pub fn start_vector(size: usize, seeds: &[(usize, bool)]) -> Array1<f64> {
    let mut v0 = Array1::from_elem(size, UNKNOWN_PRIOR);
    for (index, positive) in seeds {
        v0[*index] = if *positive { 1.0 } else { 0.0 };
    }
    v0
}

/// Run the walk from `v0`
///
/// Returns the final vector and the number of steps taken. With a tolerance
/// the walk stops once no entry changes by more than it.
pub fn propagate(
    matrix: &TransitionMatrix,
    v0: &Array1<f64>,
    teleport: f64,
    time_steps: usize,
    tolerance: Option<f64>,
) -> (Array1<f64>, usize) {
    let mut vt = v0.clone();
    for step in 1..=time_steps {
        let next = v0 * teleport + matrix.operate(&vt) * (1.0 - teleport);

        let delta = (&next - &vt).fold(0.0f64, |max, d| max.max(d.abs()));
        vt = next;
        if tolerance.is_some_and(|t| delta < t) {
            return (vt, step);
        }
    }
    (vt, time_steps)
}

// ============================================================================
// Threshold and Classification
// ============================================================================

fn mean_of(scores: &Array1<f64>, nodes: impl Iterator<Item = usize>) -> Option<f64> {
    let (sum, count) = nodes.fold((0.0, 0usize), |(s, c), i| (s + scores[i], c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Threshold from the mean scores of positive and negative control entities
///
/// `negative + bias·|positive - negative|`; `None` when either side has no
/// control entity.
pub fn calibrate_threshold(scores: &Array1<f64>, control: &[(usize, bool)], bias: f64) -> Option<f64> {
    let positive = mean_of(scores, control.iter().filter(|(_, p)| *p).map(|(i, _)| *i))?;
    let negative = mean_of(scores, control.iter().filter(|(_, p)| !*p).map(|(i, _)| *i))?;
    Some(negative + bias * (positive - negative).abs())
}

/// Classify test entities: correct when the score reaches the threshold
pub fn classify(scores: &Array1<f64>, testing: &[(usize, bool)], threshold: f64) -> ClassificationCounts {
    let mut counts = ClassificationCounts::default();
    for (index, positive) in testing {
        counts.record(scores[*index] >= threshold, *positive);
    }
    counts
}

// ============================================================================
// Assessor
// ============================================================================

/// Memo key of a neighbor lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeighborKey {
    SourceEntities(SourceId),
    ExtractionTypeEntities(ExtractionType, ConceptId),
}

/// Outcome of assessing one concept
#[derive(Debug, Clone)]
pub struct WalkOutcome {
    pub threshold: f64,
    pub counts: ClassificationCounts,
    /// Steps taken by the walk
    pub steps: usize,
}

struct WalkRun {
    split: WalkSplit,
    scores: Array1<f64>,
    steps: usize,
}

/// Builds concept graphs from a store and assesses their entities
///
/// Graphs are cached per concept, walks per (concept, training percentage).
/// Neighbor lookups are memoised across concepts.
pub struct GraphWalkAssessor<'a, S: ExtractionStore + ?Sized> {
    store: &'a S,
    config: GraphWalkConfig,
    neighbors: HashMap<NeighborKey, BTreeSet<EntityId>>,
    entities: HashMap<ConceptId, Arc<Vec<Entity>>>,
    graphs: HashMap<ConceptId, Arc<WalkGraph>>,
    walks: HashMap<(ConceptId, i64), Arc<WalkRun>>,
}

impl<'a, S: ExtractionStore + ?Sized> GraphWalkAssessor<'a, S> {
    pub fn new(store: &'a S, config: GraphWalkConfig) -> Self {
        Self {
            store,
            config,
            neighbors: HashMap::new(),
            entities: HashMap::new(),
            graphs: HashMap::new(),
            walks: HashMap::new(),
        }
    }

    /// Drop cached graphs and walks; memoised neighbor lookups are kept
    pub fn clear(&mut self) {
        self.entities.clear();
        self.graphs.clear();
        self.walks.clear();
    }

    /// Entities of a concept, in node order
    pub async fn entities(&mut self, concept: &Concept) -> Result<Arc<Vec<Entity>>> {
        if let Some(entities) = self.entities.get(&concept.id) {
            return Ok(Arc::clone(entities));
        }
        let entities = Arc::new(self.store.load_entities(concept.id).await?);
        self.entities.insert(concept.id, Arc::clone(&entities));
        Ok(entities)
    }

    /// Entities adjacent to a source or extraction type, memoised on success
    async fn neighbors(&mut self, key: NeighborKey) -> Option<BTreeSet<EntityId>> {
        if let Some(cached) = self.neighbors.get(&key) {
            return Some(cached.clone());
        }

        let result = match key {
            NeighborKey::SourceEntities(source) => self.store.entities_for_source(source).await,
            NeighborKey::ExtractionTypeEntities(extraction_type, concept) => {
                self.store
                    .entities_for_extraction_type(extraction_type, concept)
                    .await
            }
        };

        match result {
            Ok(ids) => {
                self.neighbors.insert(key, ids.clone());
                Some(ids)
            }
            Err(e) => {
                tracing::warn!(?key, error = %e, "Neighbor lookup failed, using loaded adjacency");
                None
            }
        }
    }

    /// Transition graph of a concept
    pub async fn graph(&mut self, concept: &Concept) -> Result<Arc<WalkGraph>> {
        if let Some(graph) = self.graphs.get(&concept.id) {
            return Ok(Arc::clone(graph));
        }

        let entities = self.entities(concept).await?;
        let layout = NodeLayout::from_entities(&entities);
        let index: HashMap<EntityId, usize> =
            layout.entities.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let to_indices = |ids: BTreeSet<EntityId>| -> Vec<usize> {
            ids.iter().filter_map(|id| index.get(id).copied()).collect()
        };

        let mut source_neighbors = HashMap::new();
        for source in &layout.sources {
            if let Some(ids) = self.neighbors(NeighborKey::SourceEntities(*source)).await {
                source_neighbors.insert(*source, to_indices(ids));
            }
        }

        let mut type_neighbors = HashMap::new();
        for extraction_type in &layout.extraction_types {
            let key = NeighborKey::ExtractionTypeEntities(*extraction_type, concept.id);
            if let Some(ids) = self.neighbors(key).await {
                type_neighbors.insert(*extraction_type, to_indices(ids));
            }
        }

        let graph = Arc::new(build_transition_matrix(
            &entities,
            &source_neighbors,
            &type_neighbors,
        ));
        tracing::info!(
            concept = %concept.name,
            entities = graph.layout.entities.len(),
            sources = graph.layout.sources.len(),
            extraction_types = graph.layout.extraction_types.len(),
            "Built transition matrix"
        );

        self.graphs.insert(concept.id, Arc::clone(&graph));
        Ok(graph)
    }

    async fn walk(&mut self, concept: &Concept, training_percentage: f64) -> Result<Arc<WalkRun>> {
        let key = (concept.id, (training_percentage * 1e6).round() as i64);
        if let Some(run) = self.walks.get(&key) {
            return Ok(Arc::clone(run));
        }

        let graph = self.graph(concept).await?;
        let mut entities = (*self.entities(concept).await?).clone();
        let split = sampling::split_for_walk(
            &mut entities,
            training_percentage,
            self.config.seed_percentage,
        );

        let v0 = start_vector(graph.matrix.len(), &split.seeds);
        let (scores, steps) = propagate(
            &graph.matrix,
            &v0,
            self.config.teleport,
            self.config.time_steps,
            self.config.convergence_tolerance,
        );
        tracing::debug!(concept = %concept.name, training_percentage, steps, "Walk finished");

        let run = Arc::new(WalkRun { split, scores, steps });
        self.walks.insert(key, Arc::clone(&run));
        Ok(run)
    }

    /// Assess the test entities of a concept
    ///
    /// Returns `None` when the control set lacks positives or negatives, since
    /// no threshold can be calibrated.
    pub async fn assess(
        &mut self,
        concept: &Concept,
        training_percentage: f64,
        bias: f64,
    ) -> Result<Option<WalkOutcome>> {
        let run = self.walk(concept, training_percentage).await?;

        let Some(threshold) = calibrate_threshold(&run.scores, &run.split.control, bias) else {
            tracing::warn!(
                concept = %concept.name,
                control = run.split.control.len(),
                "Control set lacks positives or negatives, skipping concept"
            );
            return Ok(None);
        };

        let counts = classify(&run.scores, &run.split.testing, threshold);
        Ok(Some(WalkOutcome {
            threshold,
            counts,
            steps: run.steps,
        }))
    }
}
