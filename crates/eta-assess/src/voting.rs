//! Entity trust voting
//!
//! Propagates trust across the bipartite entity/source graph of a concept
//! until a fixed point is reached:
//! 1. every source hosting a trusted entity gains trust
//! 2. every entity whose sources are all trusted becomes trusted
//!
//! Boolean voting gives sources full trust (1.0). Gradual voting gives them a
//! partial score and finally sets each entity's trust to the sum of its
//! sources' scores. A pass that changes no row ends the loop. Trust never
//! decreases during the passes, so the loop terminates after at most as many
//! passes as there are nodes.
//!
//! Store failures on single rows are logged and the row is skipped.
//!
//! Author: hephaex@gmail.com

use eta_core::{Concept, Entity, EntityId, ExtractionStore, Result, SourceId, VotingConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Trust value of a fully trusted node
pub const FULL_TRUST: f64 = 1.0;

/// How sources are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingMode {
    /// Sources become fully trusted
    Boolean,
    /// Sources receive a partial score; entity trust is summed at the end
    Gradual,
}

impl std::fmt::Display for VotingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Gradual => write!(f, "gradual"),
        }
    }
}

/// Result of voting on one concept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingOutcome {
    pub concept: String,
    pub mode: VotingMode,
    /// Seed entity set to full trust before voting
    pub seed: Option<EntityId>,
    /// Passes run, including the final pass that changed nothing
    pub passes: usize,
    /// Rows changed over all passes
    pub rows_affected: usize,
    /// Entities with full trust when the fixed point was reached
    pub trusted_entities: usize,
    /// Threshold separating trusted from untrusted entities
    pub trust_threshold: f64,
}

// ============================================================================
// Seed Selection
// ============================================================================

/// Pick the most reliable entity of a concept
///
/// The entity with the most distinct extraction types wins, ties broken by
/// the total number of extractions. Only entities found by more than
/// `min_extraction_types` distinct types qualify.
pub fn most_reliable_entity(entities: &[Entity], min_extraction_types: usize) -> Option<EntityId> {
    entities
        .iter()
        .filter(|e| e.extraction_types.len() > min_extraction_types)
        .max_by(|a, b| {
            a.extraction_types
                .len()
                .cmp(&b.extraction_types.len())
                .then(a.extraction_count.cmp(&b.extraction_count))
                // prefer the lower id on a complete tie
                .then(b.id.cmp(&a.id))
        })
        .map(|e| e.id)
}

// ============================================================================
// Trust Threshold
// ============================================================================

/// Find the trust value where the number of entities with at least that
/// trust drops most sharply
///
/// Only positive trust values are considered. Returns 0.0 when fewer than two
/// distinct values exist.
pub fn find_trust_threshold(trusts: &[f64]) -> f64 {
    let mut values: Vec<f64> = trusts.iter().copied().filter(|t| *t > 0.0).collect();
    values.sort_by(f64::total_cmp);

    let mut distinct: Vec<f64> = values.clone();
    distinct.dedup();

    let at_least = |t: f64| values.len() - values.partition_point(|v| *v < t);

    let mut threshold = 0.0;
    let mut highest_gradient = 0;
    let mut last: Option<usize> = None;
    for trust in distinct {
        let count = at_least(trust);
        if let Some(previous) = last {
            let gradient = previous - count;
            if gradient > highest_gradient {
                highest_gradient = gradient;
                threshold = trust;
            }
        }
        last = Some(count);
    }
    threshold
}

// ============================================================================
// Voting Engine
// ============================================================================

/// Fixed-point trust voting over an extraction store
pub struct EntityTrustVoting<'a, S: ExtractionStore + ?Sized> {
    store: &'a S,
    config: VotingConfig,
}

impl<'a, S: ExtractionStore + ?Sized> EntityTrustVoting<'a, S> {
    pub fn new(store: &'a S, config: VotingConfig) -> Self {
        Self { store, config }
    }

    /// Score a source receives from a trusted entity
    fn source_score(&self, mode: VotingMode) -> f64 {
        match mode {
            VotingMode::Boolean => FULL_TRUST,
            VotingMode::Gradual => self.config.gradual_source_trust,
        }
    }

    /// Vote on every concept of the store; failing concepts are skipped
    ///
    /// A store that cannot list its concepts yields no outcomes.
    pub async fn run_voting(&self, mode: VotingMode) -> Result<Vec<VotingOutcome>> {
        let concepts = match self.store.load_concepts().await {
            Ok(concepts) => concepts,
            Err(e) => {
                tracing::error!(store = self.store.name(), error = %e, "Failed to load concepts");
                return Ok(Vec::new());
            }
        };
        tracing::info!(concepts = concepts.len(), %mode, store = self.store.name(), "Start entity trust voting");

        let mut outcomes = Vec::with_capacity(concepts.len());
        for concept in &concepts {
            match self.run_concept(concept, mode).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(concept = %concept.name, error = %e, "Voting failed, skipping concept");
                }
            }
        }
        Ok(outcomes)
    }

    /// Vote on one concept until no row changes
    pub async fn run_concept(&self, concept: &Concept, mode: VotingMode) -> Result<VotingOutcome> {
        let entities = self.store.load_entities(concept.id).await?;

        let seed = most_reliable_entity(&entities, self.config.seed_min_extraction_types);
        if let Some(seed) = seed {
            if let Err(e) = self.store.set_entity_trust(seed, FULL_TRUST).await {
                tracing::warn!(entity = %seed, error = %e, "Failed to trust seed entity");
            }
        }
        tracing::debug!(concept = %concept.name, ?seed, entities = entities.len(), "Voting seed");

        let source_score = self.source_score(mode);
        let mut passes = 0;
        let mut rows_affected = 0;
        loop {
            passes += 1;
            let affected = self.trust_sources(&entities, source_score).await
                + self.trust_entities(&entities, source_score).await;
            rows_affected += affected;
            tracing::debug!(concept = %concept.name, pass = passes, affected, "Voting pass");

            if affected == 0 {
                break;
            }
            if passes >= self.config.max_passes {
                tracing::warn!(concept = %concept.name, passes, "Voting stopped at pass limit");
                break;
            }
        }

        if mode == VotingMode::Gradual {
            self.aggregate_entity_trust(&entities).await;
        }

        let trusts = self.current_trusts(&entities).await;
        let trusted_entities = trusts.iter().filter(|t| **t >= FULL_TRUST).count();
        let trust_threshold = find_trust_threshold(&trusts);

        tracing::info!(
            concept = %concept.name,
            %mode,
            passes,
            rows_affected,
            trusted_entities,
            trust_threshold,
            "Voting converged"
        );

        Ok(VotingOutcome {
            concept: concept.name.clone(),
            mode,
            seed,
            passes,
            rows_affected,
            trusted_entities,
            trust_threshold,
        })
    }

    /// Give every source of a trusted entity at least `score`
    async fn trust_sources(&self, entities: &[Entity], score: f64) -> usize {
        let mut affected = 0;
        for entity in entities {
            let trust = match self.store.entity_trust(entity.id).await {
                Ok(trust) => trust,
                Err(e) => {
                    tracing::warn!(entity = %entity.id, error = %e, "Failed to read entity trust");
                    continue;
                }
            };
            if trust < FULL_TRUST {
                continue;
            }

            for source in &entity.sources {
                match self.store.source_trust(*source).await {
                    Ok(current) if current >= score => {}
                    Ok(_) => match self.store.set_source_trust(*source, score).await {
                        Ok(()) => affected += 1,
                        Err(e) => {
                            tracing::warn!(source = %source, error = %e, "Failed to set source trust")
                        }
                    },
                    Err(e) => {
                        tracing::warn!(source = %source, error = %e, "Failed to read source trust")
                    }
                }
            }
        }
        affected
    }

    /// Trust every entity whose sources all carry at least `score`
    async fn trust_entities(&self, entities: &[Entity], score: f64) -> usize {
        let mut affected = 0;
        for entity in entities.iter().filter(|e| !e.sources.is_empty()) {
            match self.store.entity_trust(entity.id).await {
                Ok(trust) if trust >= FULL_TRUST => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(entity = %entity.id, error = %e, "Failed to read entity trust");
                    continue;
                }
            }

            if !self.all_sources_trusted(&entity.sources, score).await {
                continue;
            }

            match self.store.set_entity_trust(entity.id, FULL_TRUST).await {
                Ok(()) => affected += 1,
                Err(e) => tracing::warn!(entity = %entity.id, error = %e, "Failed to set entity trust"),
            }
        }
        affected
    }

    async fn all_sources_trusted(&self, sources: &BTreeSet<SourceId>, score: f64) -> bool {
        for source in sources {
            match self.store.source_trust(*source).await {
                Ok(trust) if trust >= score => {}
                Ok(_) => return false,
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Failed to read source trust");
                    return false;
                }
            }
        }
        true
    }

    /// Set each entity's trust to the sum of its sources' scores
    async fn aggregate_entity_trust(&self, entities: &[Entity]) {
        for entity in entities.iter().filter(|e| !e.sources.is_empty()) {
            let mut sum = 0.0;
            for source in &entity.sources {
                match self.store.source_trust(*source).await {
                    Ok(trust) => sum += trust,
                    Err(e) => tracing::warn!(source = %source, error = %e, "Failed to read source trust"),
                }
            }
            if let Err(e) = self.store.set_entity_trust(entity.id, sum).await {
                tracing::warn!(entity = %entity.id, error = %e, "Failed to set entity trust");
            }
        }
    }

    async fn current_trusts(&self, entities: &[Entity]) -> Vec<f64> {
        let mut trusts = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.store.entity_trust(entity.id).await {
                Ok(trust) => trusts.push(trust),
                Err(e) => tracing::warn!(entity = %entity.id, error = %e, "Failed to read entity trust"),
            }
        }
        trusts
    }
}

// ============================================================================
// Entity Connection
// ============================================================================

/// A node on a path between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PathNode {
    Entity(EntityId),
    Source(SourceId),
}

/// Find the shortest alternating entity/source path connecting two entities
/// through shared sources
///
/// Returns `None` when the entities are not connected.
pub async fn find_entity_connection<S: ExtractionStore + ?Sized>(
    store: &S,
    from: EntityId,
    to: EntityId,
) -> Result<Option<Vec<PathNode>>> {
    if from == to {
        return Ok(Some(vec![PathNode::Entity(from)]));
    }

    let mut parents: HashMap<PathNode, PathNode> = HashMap::new();
    let mut visited_sources: HashSet<SourceId> = HashSet::new();
    let mut visited_entities: HashSet<EntityId> = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);

    while let Some(entity) = queue.pop_front() {
        let sources = match store.sources_for_entity(entity).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(entity = %entity, error = %e, "Failed to load sources");
                continue;
            }
        };

        for source in sources {
            if !visited_sources.insert(source) {
                continue;
            }
            parents.insert(PathNode::Source(source), PathNode::Entity(entity));

            let neighbours = match store.entities_for_source(source).await {
                Ok(neighbours) => neighbours,
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Failed to load source entities");
                    continue;
                }
            };

            for next in neighbours {
                if !visited_entities.insert(next) {
                    continue;
                }
                parents.insert(PathNode::Entity(next), PathNode::Source(source));
                if next == to {
                    return Ok(Some(trace_path(&parents, PathNode::Entity(to))));
                }
                queue.push_back(next);
            }
        }
    }

    Ok(None)
}

fn trace_path(parents: &HashMap<PathNode, PathNode>, end: PathNode) -> Vec<PathNode> {
    let mut path = vec![end];
    let mut current = end;
    while let Some(parent) = parents.get(&current) {
        path.push(*parent);
        current = *parent;
    }
    path.reverse();
    path
}
